//! Zone capture state machine
//!
//! A zone is a rectangle with a single-character identifier. Its capture
//! state advances once per tick from the per-player tank counts inside it.

use std::collections::HashMap;

/// Capture state of a zone
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ZoneStatus {
    Neutral,
    BeingCaptured {
        player_id: String,
        progress: u32,
    },
    Captured {
        player_id: String,
    },
    /// More than one player inside. `captured_by` anchors the previous
    /// holder so the zone falls back to them when everyone leaves.
    BeingContested {
        captured_by: Option<String>,
        progress: u32,
    },
    BeingRetaken {
        attacker_id: String,
        defender_id: String,
        progress: u32,
    },
}

#[derive(Debug, Clone)]
pub struct Zone {
    pub id: char,
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
    pub status: ZoneStatus,
}

impl Zone {
    pub fn new(id: char, x: i32, y: i32, width: i32, height: i32) -> Self {
        Self {
            id,
            x,
            y,
            width,
            height,
            status: ZoneStatus::Neutral,
        }
    }

    pub fn contains(&self, x: i32, y: i32) -> bool {
        x >= self.x && x < self.x + self.width && y >= self.y && y < self.y + self.height
    }

    /// Advance the capture state by one tick given per-player tank counts
    /// inside the zone. Progress saturates at `capture_ticks`.
    pub fn advance(&mut self, occupants: &HashMap<String, usize>, capture_ticks: u32) {
        let players: Vec<&String> = {
            let mut ids: Vec<&String> = occupants
                .iter()
                .filter(|(_, &count)| count > 0)
                .map(|(id, _)| id)
                .collect();
            ids.sort();
            ids
        };

        self.status = match std::mem::replace(&mut self.status, ZoneStatus::Neutral) {
            ZoneStatus::Neutral => match players.as_slice() {
                [] => ZoneStatus::Neutral,
                [p] => ZoneStatus::BeingCaptured {
                    player_id: (*p).clone(),
                    progress: 1,
                },
                _ => ZoneStatus::BeingContested {
                    captured_by: None,
                    progress: 1,
                },
            },
            ZoneStatus::BeingCaptured {
                player_id,
                progress,
            } => match players.as_slice() {
                [] => {
                    if progress <= 1 {
                        ZoneStatus::Neutral
                    } else {
                        ZoneStatus::BeingCaptured {
                            player_id,
                            progress: progress - 1,
                        }
                    }
                }
                [p] if **p == player_id => {
                    if progress + 1 >= capture_ticks {
                        ZoneStatus::Captured { player_id }
                    } else {
                        ZoneStatus::BeingCaptured {
                            player_id,
                            progress: progress + 1,
                        }
                    }
                }
                _ => ZoneStatus::BeingContested {
                    captured_by: None,
                    progress,
                },
            },
            ZoneStatus::Captured { player_id } => match players.as_slice() {
                [] => ZoneStatus::Captured { player_id },
                [p] if **p == player_id => ZoneStatus::Captured { player_id },
                [q] => ZoneStatus::BeingRetaken {
                    attacker_id: (*q).clone(),
                    defender_id: player_id,
                    progress: 1,
                },
                _ => ZoneStatus::BeingContested {
                    captured_by: Some(player_id),
                    progress: 1,
                },
            },
            ZoneStatus::BeingRetaken {
                attacker_id,
                defender_id,
                progress,
            } => match players.as_slice() {
                [p] if **p == attacker_id => {
                    if progress + 1 >= capture_ticks {
                        ZoneStatus::Captured {
                            player_id: attacker_id,
                        }
                    } else {
                        ZoneStatus::BeingRetaken {
                            attacker_id,
                            defender_id,
                            progress: progress + 1,
                        }
                    }
                }
                // Attacker gone: the retake decays back towards the defender.
                [] => {
                    if progress <= 1 {
                        ZoneStatus::Captured {
                            player_id: defender_id,
                        }
                    } else {
                        ZoneStatus::BeingRetaken {
                            attacker_id,
                            defender_id,
                            progress: progress - 1,
                        }
                    }
                }
                [p] if **p == defender_id => {
                    if progress <= 1 {
                        ZoneStatus::Captured {
                            player_id: defender_id,
                        }
                    } else {
                        ZoneStatus::BeingRetaken {
                            attacker_id,
                            defender_id,
                            progress: progress - 1,
                        }
                    }
                }
                [q] => ZoneStatus::BeingRetaken {
                    attacker_id: (*q).clone(),
                    defender_id,
                    progress: 1,
                },
                _ => ZoneStatus::BeingContested {
                    captured_by: Some(defender_id),
                    progress,
                },
            },
            ZoneStatus::BeingContested {
                captured_by,
                progress,
            } => match players.as_slice() {
                [] => {
                    if progress <= 1 {
                        match captured_by {
                            Some(player_id) => ZoneStatus::Captured { player_id },
                            None => ZoneStatus::Neutral,
                        }
                    } else {
                        ZoneStatus::BeingContested {
                            captured_by,
                            progress: progress - 1,
                        }
                    }
                }
                [q] => match captured_by {
                    Some(holder) if holder == **q => ZoneStatus::Captured { player_id: holder },
                    Some(holder) => ZoneStatus::BeingRetaken {
                        attacker_id: (*q).clone(),
                        defender_id: holder,
                        progress: progress.max(1),
                    },
                    None => ZoneStatus::BeingCaptured {
                        player_id: (*q).clone(),
                        progress: progress.max(1),
                    },
                },
                _ => ZoneStatus::BeingContested {
                    captured_by,
                    progress,
                },
            },
        };
    }

    /// Player currently holding the zone, if fully captured
    pub fn holder(&self) -> Option<&str> {
        match &self.status {
            ZoneStatus::Captured { player_id } => Some(player_id),
            _ => None,
        }
    }
}
