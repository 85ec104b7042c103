//! Static map model: walls, zone rectangles, spawn points
//!
//! The grid is generated once from the match seed and never mutated
//! afterwards. Capture state lives on [`crate::game::zones::Zone`].

use rand::Rng;
use rand_chacha::ChaCha8Rng;

use crate::game::zones::Zone;

/// Fraction of inner tiles turned into walls during generation
const WALL_DENSITY: f64 = 0.1;

/// Cardinal directions on the grid, cyclic in clockwise order.
/// The origin is top-left, so `Up` decreases `y`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    Up,
    Right,
    Down,
    Left,
}

impl Direction {
    pub const ALL: [Direction; 4] = [
        Direction::Up,
        Direction::Right,
        Direction::Down,
        Direction::Left,
    ];

    /// Clockwise neighbor
    pub fn next(self) -> Self {
        match self {
            Direction::Up => Direction::Right,
            Direction::Right => Direction::Down,
            Direction::Down => Direction::Left,
            Direction::Left => Direction::Up,
        }
    }

    /// Counter-clockwise neighbor
    pub fn previous(self) -> Self {
        match self {
            Direction::Up => Direction::Left,
            Direction::Left => Direction::Down,
            Direction::Down => Direction::Right,
            Direction::Right => Direction::Up,
        }
    }

    pub fn opposite(self) -> Self {
        self.next().next()
    }

    /// Unit tile offset `(dx, dy)`
    pub fn offset(self) -> (i32, i32) {
        match self {
            Direction::Up => (0, -1),
            Direction::Right => (1, 0),
            Direction::Down => (0, 1),
            Direction::Left => (-1, 0),
        }
    }

    pub fn rotated(self, rotation: Rotation) -> Self {
        match rotation {
            Rotation::Left => self.previous(),
            Rotation::Right => self.next(),
        }
    }

    pub fn is_horizontal(self) -> bool {
        matches!(self, Direction::Left | Direction::Right)
    }
}

/// A quarter-turn applied to a tank or turret
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rotation {
    Left,
    Right,
}

/// The static square map
#[derive(Debug, Clone)]
pub struct MapGrid {
    dim: usize,
    walls: Vec<Vec<bool>>,
    spawns: Vec<(i32, i32)>,
}

impl MapGrid {
    /// Generate a map from the match seed: scattered walls, `zone_count`
    /// non-overlapping zones (walls cleared inside), and `spawn_count`
    /// wall-free, mutually distant spawn points.
    pub fn generate(
        dim: usize,
        zone_count: usize,
        spawn_count: usize,
        rng: &mut ChaCha8Rng,
    ) -> (Self, Vec<Zone>) {
        let mut walls = vec![vec![false; dim]; dim];
        for row in walls.iter_mut() {
            for cell in row.iter_mut() {
                *cell = rng.gen_bool(WALL_DENSITY);
            }
        }

        let zones = place_zones(dim, zone_count, rng);
        for zone in &zones {
            for y in zone.y..zone.y + zone.height {
                for x in zone.x..zone.x + zone.width {
                    walls[y as usize][x as usize] = false;
                }
            }
        }

        let mut grid = Self {
            dim,
            walls,
            spawns: Vec::new(),
        };
        grid.spawns = pick_spawns(&grid, &zones, spawn_count, rng);
        for &(x, y) in &grid.spawns {
            grid.walls[y as usize][x as usize] = false;
        }

        (grid, zones)
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn in_bounds(&self, x: i32, y: i32) -> bool {
        x >= 0 && y >= 0 && (x as usize) < self.dim && (y as usize) < self.dim
    }

    /// Solid at `(x, y)`? The implicit border counts as a wall.
    pub fn is_wall(&self, x: i32, y: i32) -> bool {
        if !self.in_bounds(x, y) {
            return true;
        }
        self.walls[y as usize][x as usize]
    }

    pub fn spawn_points(&self) -> &[(i32, i32)] {
        &self.spawns
    }

    /// Load a map from explicit parts instead of generating one. Rows
    /// shorter than `dim` are padded with open tiles.
    pub fn from_parts(dim: usize, mut walls: Vec<Vec<bool>>, spawns: Vec<(i32, i32)>) -> Self {
        walls.resize(dim, Vec::new());
        for row in walls.iter_mut() {
            row.resize(dim, false);
        }
        Self { dim, walls, spawns }
    }
}

fn place_zones(dim: usize, zone_count: usize, rng: &mut ChaCha8Rng) -> Vec<Zone> {
    let mut zones: Vec<Zone> = Vec::with_capacity(zone_count);
    let mut attempts = 0;
    while zones.len() < zone_count && attempts < 200 {
        attempts += 1;
        let width = rng.gen_range(3..=5).min(dim as i32 - 2);
        let height = rng.gen_range(3..=5).min(dim as i32 - 2);
        let x = rng.gen_range(1..(dim as i32 - width).max(2));
        let y = rng.gen_range(1..(dim as i32 - height).max(2));

        let overlaps = zones.iter().any(|z: &Zone| {
            x < z.x + z.width + 1 && z.x < x + width + 1 && y < z.y + z.height + 1 && z.y < y + height + 1
        });
        if overlaps {
            continue;
        }

        let id = (b'A' + zones.len() as u8) as char;
        zones.push(Zone::new(id, x, y, width, height));
    }
    zones
}

fn pick_spawns(
    grid: &MapGrid,
    zones: &[Zone],
    spawn_count: usize,
    rng: &mut ChaCha8Rng,
) -> Vec<(i32, i32)> {
    let dim = grid.dim as i32;
    let min_distance = (dim / 4).max(2);
    let mut spawns: Vec<(i32, i32)> = Vec::with_capacity(spawn_count);
    let mut attempts = 0;
    while spawns.len() < spawn_count && attempts < 500 {
        attempts += 1;
        let x = rng.gen_range(0..dim);
        let y = rng.gen_range(0..dim);
        if grid.is_wall(x, y) || zones.iter().any(|z| z.contains(x, y)) {
            continue;
        }
        let spacing = if attempts > 300 { 1 } else { min_distance };
        let too_close = spawns
            .iter()
            .any(|&(sx, sy)| (sx - x).abs() + (sy - y).abs() < spacing);
        if too_close {
            continue;
        }
        spawns.push((x, y));
    }
    spawns
}
