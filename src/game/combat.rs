//! Combat entities: bullets, lasers, mines, and map items
//!
//! Per-tick stepping and collision resolution live on
//! [`crate::game::r#match::MatchState`]; this module holds the entity data
//! and the small helpers that do not need whole-world access.

use crate::game::grid::Direction;
use crate::game::tank::SecondaryItem;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BulletKind {
    Basic,
    Double,
}

/// A bullet in flight. Position is a floating sub-tile point; the occupied
/// tile is the floor of both coordinates.
#[derive(Debug, Clone)]
pub struct Bullet {
    pub id: u64,
    pub x: f64,
    pub y: f64,
    /// Tiles per tick
    pub speed: f64,
    pub direction: Direction,
    pub kind: BulletKind,
    pub shooter_id: String,
}

impl Bullet {
    /// Centered on `tile`
    pub fn at_tile(
        id: u64,
        tile: (i32, i32),
        direction: Direction,
        speed: f64,
        kind: BulletKind,
        shooter_id: String,
    ) -> Self {
        Self {
            id,
            x: tile.0 as f64 + 0.5,
            y: tile.1 as f64 + 0.5,
            speed,
            direction,
            kind,
            shooter_id,
        }
    }

    pub fn tile(&self) -> (i32, i32) {
        (self.x.floor() as i32, self.y.floor() as i32)
    }

    pub fn damage(&self, basic_damage: u8, double_damage: u8) -> u8 {
        match self.kind {
            BulletKind::Basic => basic_damage,
            BulletKind::Double => double_damage,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LaserOrientation {
    Horizontal,
    Vertical,
}

impl From<Direction> for LaserOrientation {
    fn from(direction: Direction) -> Self {
        if direction.is_horizontal() {
            LaserOrientation::Horizontal
        } else {
            LaserOrientation::Vertical
        }
    }
}

/// A laser beam occupying a straight run of tiles for a few ticks
#[derive(Debug, Clone)]
pub struct Laser {
    pub id: u64,
    pub tiles: Vec<(i32, i32)>,
    pub orientation: LaserOrientation,
    pub damage: u8,
    pub remaining_ticks: u32,
    pub shooter_id: String,
}

impl Laser {
    pub fn covers(&self, tile: (i32, i32)) -> bool {
        self.tiles.contains(&tile)
    }
}

/// A dropped mine. `explode_remaining_ticks` is `None` while armed and
/// counts down the visual fade once detonated. The owner is spared until
/// they first leave the tile.
#[derive(Debug, Clone)]
pub struct Mine {
    pub id: u64,
    pub x: i32,
    pub y: i32,
    pub damage: u8,
    pub owner_id: String,
    pub explode_remaining_ticks: Option<u32>,
    pub owner_cleared: bool,
}

impl Mine {
    pub fn new(id: u64, x: i32, y: i32, damage: u8, owner_id: String) -> Self {
        Self {
            id,
            x,
            y,
            damage,
            owner_id,
            explode_remaining_ticks: None,
            owner_cleared: false,
        }
    }

    pub fn is_armed(&self) -> bool {
        self.explode_remaining_ticks.is_none()
    }

    /// Would a tank standing on the tile set this mine off?
    pub fn triggered_by(&self, tank_owner: &str) -> bool {
        self.is_armed() && (tank_owner != self.owner_id || self.owner_cleared)
    }

    /// Chebyshev distance check for blast damage
    pub fn in_blast(&self, x: i32, y: i32, radius: i32) -> bool {
        (x - self.x).abs().max((y - self.y).abs()) <= radius
    }
}

/// A secondary item lying on the map awaiting pickup
#[derive(Debug, Clone)]
pub struct MapItem {
    pub x: i32,
    pub y: i32,
    pub kind: SecondaryItem,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bullet_tile_is_floor_of_position() {
        let b = Bullet::at_tile(1, (4, 7), Direction::Right, 2.0, BulletKind::Basic, "p".into());
        assert_eq!(b.tile(), (4, 7));

        let mut b = b;
        b.x += 0.6;
        assert_eq!(b.tile(), (5, 7));
    }

    #[test]
    fn mine_spares_owner_until_cleared() {
        let mut mine = Mine::new(1, 3, 3, 50, "p1".into());
        assert!(!mine.triggered_by("p1"));
        assert!(mine.triggered_by("p2"));

        mine.owner_cleared = true;
        assert!(mine.triggered_by("p1"));

        mine.explode_remaining_ticks = Some(5);
        assert!(!mine.triggered_by("p2"));
    }

    #[test]
    fn blast_radius_is_chebyshev() {
        let mine = Mine::new(1, 5, 5, 50, "p1".into());
        assert!(mine.in_blast(5, 5, 1));
        assert!(mine.in_blast(6, 6, 1));
        assert!(!mine.in_blast(7, 5, 1));
        assert!(mine.in_blast(7, 3, 2));
    }
}
