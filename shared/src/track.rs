//! Collision geometry the race session queries each tick.
//!
//! Level files and their parsing live outside this crate; all the session
//! needs is a [`TrackGeometry`]. [`BuiltinLevels`] provides a couple of
//! closed circuits so both tiers can resolve `init-race` names on their own.

use crate::math::{Segment, Vector2};
use std::sync::Arc;

pub trait TrackGeometry: Send + Sync {
    fn name(&self) -> &str;

    /// Wall segments closer than `radius` to `position`.
    fn walls_near(&self, position: Vector2, radius: f32) -> Vec<Segment>;

    /// Crossing this line along its left-hand normal completes a lap.
    fn finish_line(&self) -> Segment;

    /// Grid slot for the `index`-th participant: position and heading.
    fn spawn_slot(&self, index: usize) -> (Vector2, f32);
}

/// Resolves level names announced by `init-race`.
pub trait LevelSource {
    fn load(&self, name: &str) -> Option<Arc<dyn TrackGeometry>>;
}

#[derive(Debug, Clone)]
pub struct Track {
    name: String,
    walls: Vec<Segment>,
    finish_line: Segment,
    spawns: Vec<(Vector2, f32)>,
}

impl Track {
    pub fn new(
        name: &str,
        walls: Vec<Segment>,
        finish_line: Segment,
        spawns: Vec<(Vector2, f32)>,
    ) -> Self {
        Self {
            name: name.to_string(),
            walls,
            finish_line,
            spawns,
        }
    }

    /// Closed wall loop through `points`.
    pub fn polygon(points: &[Vector2]) -> Vec<Segment> {
        points
            .iter()
            .zip(points.iter().cycle().skip(1))
            .map(|(a, b)| Segment::new(*a, *b))
            .collect()
    }

    pub fn walls(&self) -> &[Segment] {
        &self.walls
    }
}

impl TrackGeometry for Track {
    fn name(&self) -> &str {
        &self.name
    }

    fn walls_near(&self, position: Vector2, radius: f32) -> Vec<Segment> {
        self.walls
            .iter()
            .filter(|wall| wall.distance_to(position) < radius)
            .copied()
            .collect()
    }

    fn finish_line(&self) -> Segment {
        self.finish_line
    }

    fn spawn_slot(&self, index: usize) -> (Vector2, f32) {
        if self.spawns.is_empty() {
            return (self.finish_line.a, 0.0);
        }
        self.spawns[index % self.spawns.len()]
    }
}

/// The circuits shipped with the game.
#[derive(Debug, Default, Clone, Copy)]
pub struct BuiltinLevels;

impl BuiltinLevels {
    pub const NAMES: [&'static str; 2] = ["oval", "square"];

    pub fn track(name: &str) -> Option<Track> {
        let (outer, inner) = match name {
            "square" => (
                vec![
                    Vector2::new(0.0, 0.0),
                    Vector2::new(1200.0, 0.0),
                    Vector2::new(1200.0, 800.0),
                    Vector2::new(0.0, 800.0),
                ],
                vec![
                    Vector2::new(250.0, 250.0),
                    Vector2::new(950.0, 250.0),
                    Vector2::new(950.0, 550.0),
                    Vector2::new(250.0, 550.0),
                ],
            ),
            "oval" => (
                vec![
                    Vector2::new(150.0, 0.0),
                    Vector2::new(1050.0, 0.0),
                    Vector2::new(1200.0, 150.0),
                    Vector2::new(1200.0, 650.0),
                    Vector2::new(1050.0, 800.0),
                    Vector2::new(150.0, 800.0),
                    Vector2::new(0.0, 650.0),
                    Vector2::new(0.0, 150.0),
                ],
                vec![
                    Vector2::new(300.0, 250.0),
                    Vector2::new(900.0, 250.0),
                    Vector2::new(950.0, 300.0),
                    Vector2::new(950.0, 500.0),
                    Vector2::new(900.0, 550.0),
                    Vector2::new(300.0, 550.0),
                    Vector2::new(250.0, 500.0),
                    Vector2::new(250.0, 300.0),
                ],
            ),
            _ => return None,
        };

        let mut walls = Track::polygon(&outer);
        walls.extend(Track::polygon(&inner));

        // Runs top to bottom across the lower straight, so its normal is +x:
        // cars race counter-clockwise.
        let finish_line = Segment::new(Vector2::new(600.0, 250.0), Vector2::new(600.0, 0.0));

        let spawns = (0..9)
            .map(|i| {
                let column = (i / 3) as f32;
                let row = (i % 3) as f32;
                (Vector2::new(760.0 - 50.0 * column, 60.0 + 65.0 * row), 0.0)
            })
            .collect();

        Some(Track::new(name, walls, finish_line, spawns))
    }
}

impl LevelSource for BuiltinLevels {
    fn load(&self, name: &str) -> Option<Arc<dyn TrackGeometry>> {
        Self::track(name).map(|track| Arc::new(track) as Arc<dyn TrackGeometry>)
    }
}
