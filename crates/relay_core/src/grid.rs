//! Grid map parsing and the derived routing graph.
//!
//! The textual map uses one glyph per cell: `#` wall, `.` free, `F` refuel
//! depot. [`GridMap`] is the immutable layout; [`GridGraph`] is the read-only
//! graph over traversable cells used for every path and reachability query.
//! The graph is built once per scenario and caches successful paths in an LRU
//! (directional keys, since tie-breaking is not reversal-symmetric).

use std::collections::BTreeSet;
use std::fmt;
use std::num::NonZeroUsize;
use std::sync::Mutex;

use bevy_ecs::prelude::Resource;
use lru::LruCache;
use pathfinding::prelude::{bfs, dijkstra_all};
use serde::{Deserialize, Serialize};

use crate::error::{RelayError, Result};

/// Path cache capacity per graph. Scenario grids are small; this is generous.
const PATH_CACHE_CAPACITY: usize = 4_096;

/// One grid coordinate. `Ord` is lexicographic (row, then column), which is
/// the deterministic tie-break order used by every planner.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct Cell {
    pub row: usize,
    pub col: usize,
}

impl Cell {
    pub fn new(row: usize, col: usize) -> Self {
        Self { row, col }
    }
}

impl fmt::Display for Cell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.row, self.col)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CellKind {
    Free,
    Wall,
    Depot,
}

/// Immutable 2D layout. Created once at setup, never mutated.
#[derive(Debug, Clone)]
pub struct GridMap {
    rows: usize,
    cols: usize,
    cells: Vec<CellKind>,
}

impl GridMap {
    /// Parse a textual layout. Fails with [`RelayError::InvalidMap`] on empty
    /// input, ragged rows, unknown glyphs, or a map with no traversable cell.
    pub fn parse(layout: &str) -> Result<Self> {
        let lines: Vec<&str> = layout
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .collect();
        if lines.is_empty() {
            return Err(RelayError::InvalidMap {
                reason: "empty layout".to_string(),
            });
        }

        let cols = lines[0].chars().count();
        let mut cells = Vec::with_capacity(lines.len() * cols);
        for (row, line) in lines.iter().enumerate() {
            if line.chars().count() != cols {
                return Err(RelayError::InvalidMap {
                    reason: format!(
                        "row {} has width {} (expected {})",
                        row,
                        line.chars().count(),
                        cols
                    ),
                });
            }
            for (col, glyph) in line.chars().enumerate() {
                let kind = match glyph {
                    '.' => CellKind::Free,
                    '#' => CellKind::Wall,
                    'F' => CellKind::Depot,
                    other => {
                        return Err(RelayError::InvalidMap {
                            reason: format!("unknown glyph {:?} at ({}, {})", other, row, col),
                        })
                    }
                };
                cells.push(kind);
            }
        }

        let map = Self {
            rows: lines.len(),
            cols,
            cells,
        };
        if map.traversable_cells().next().is_none() {
            return Err(RelayError::InvalidMap {
                reason: "no traversable cells".to_string(),
            });
        }
        Ok(map)
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn in_bounds(&self, cell: Cell) -> bool {
        cell.row < self.rows && cell.col < self.cols
    }

    pub fn kind(&self, cell: Cell) -> Option<CellKind> {
        self.in_bounds(cell)
            .then(|| self.cells[cell.row * self.cols + cell.col])
    }

    /// Free and depot cells are traversable; walls and out-of-bounds are not.
    pub fn is_traversable(&self, cell: Cell) -> bool {
        matches!(self.kind(cell), Some(CellKind::Free) | Some(CellKind::Depot))
    }

    pub fn is_depot(&self, cell: Cell) -> bool {
        matches!(self.kind(cell), Some(CellKind::Depot))
    }

    /// All traversable cells in lexicographic order.
    pub fn traversable_cells(&self) -> impl Iterator<Item = Cell> + '_ {
        (0..self.rows).flat_map(move |row| {
            (0..self.cols)
                .map(move |col| Cell::new(row, col))
                .filter(move |cell| self.is_traversable(*cell))
        })
    }
}

/// Read-only routing graph over a [`GridMap`]: vertices are traversable
/// cells, edges are legal 4-neighborhood moves at unit cost. Symmetric unit
/// costs make distances symmetric and triangle-inequality safe.
#[derive(Debug, Resource)]
pub struct GridGraph {
    map: GridMap,
    path_cache: Mutex<LruCache<(Cell, Cell), Vec<Cell>>>,
}

impl GridGraph {
    pub fn new(map: GridMap) -> Self {
        Self {
            map,
            path_cache: Mutex::new(LruCache::new(
                NonZeroUsize::new(PATH_CACHE_CAPACITY).expect("cache capacity must be > 0"),
            )),
        }
    }

    /// Parse a layout and build its graph in one step.
    pub fn build(layout: &str) -> Result<Self> {
        Ok(Self::new(GridMap::parse(layout)?))
    }

    pub fn map(&self) -> &GridMap {
        &self.map
    }

    /// Traversable 4-neighbors in lexicographic order. Successor order is
    /// what makes equal-length path ties deterministic.
    fn neighbors(&self, cell: Cell) -> Vec<Cell> {
        let mut out = Vec::with_capacity(4);
        if cell.row > 0 {
            out.push(Cell::new(cell.row - 1, cell.col));
        }
        if cell.col > 0 {
            out.push(Cell::new(cell.row, cell.col - 1));
        }
        out.push(Cell::new(cell.row, cell.col + 1));
        out.push(Cell::new(cell.row + 1, cell.col));
        out.retain(|c| self.map.is_traversable(*c));
        out
    }

    /// Shortest path including both endpoints. Fails with
    /// [`RelayError::Unreachable`] when no path exists (walls, disconnected
    /// regions, or a non-traversable endpoint).
    pub fn shortest_path(&self, from: Cell, to: Cell) -> Result<Vec<Cell>> {
        if !self.map.is_traversable(from) || !self.map.is_traversable(to) {
            return Err(RelayError::Unreachable { from, to });
        }
        if from == to {
            return Ok(vec![from]);
        }

        if let Ok(mut cache) = self.path_cache.lock() {
            if let Some(path) = cache.get(&(from, to)) {
                return Ok(path.clone());
            }
        }

        let path = bfs(&from, |cell| self.neighbors(*cell), |cell| *cell == to)
            .ok_or(RelayError::Unreachable { from, to })?;

        if let Ok(mut cache) = self.path_cache.lock() {
            cache.put((from, to), path.clone());
        }
        Ok(path)
    }

    /// Number of moves on the shortest path.
    pub fn shortest_distance(&self, from: Cell, to: Cell) -> Result<u32> {
        Ok((self.shortest_path(from, to)?.len() - 1) as u32)
    }

    /// All cells reachable from `from` spending at most `max_cost` moves,
    /// including `from` itself. Empty when `from` is not traversable.
    pub fn reachable_from(&self, from: Cell, max_cost: u32) -> BTreeSet<Cell> {
        let mut out = BTreeSet::new();
        if !self.map.is_traversable(from) {
            return out;
        }
        out.insert(from);
        let costs = dijkstra_all(&from, |cell| {
            self.neighbors(*cell).into_iter().map(|n| (n, 1u32))
        });
        for (cell, (_, cost)) in costs {
            if cost <= max_cost {
                out.insert(cell);
            }
        }
        out
    }
}
