use super::geometry::Vec2;
use super::tilemap::{TileCoord, Tilemap};

const STRAIGHT_COST: u32 = 10;
const DIAGONAL_COST: u32 = 14;
pub const DEFAULT_MAX_EXPANDED_NODES: usize = 4096;

/// Tile-center waypoints from the tile after `start` up to and including `goal`.
pub fn find_path(
    tilemap: &Tilemap,
    start_world: Vec2,
    goal_world: Vec2,
    max_expanded: usize,
) -> Option<Vec<Vec2>> {
    let start = tilemap.world_to_tile(start_world)?;
    let goal = tilemap.world_to_tile(goal_world)?;
    let tile_path = find_path_tiles(tilemap, start, goal, max_expanded)?;
    Some(
        tile_path
            .into_iter()
            .skip(1)
            .map(|tile| tilemap.tile_center_world(tile))
            .collect(),
    )
}

/// Tile-raster line of sight; blocked tiles between the endpoints break it.
pub fn line_of_sight(tilemap: &Tilemap, from: Vec2, to: Vec2) -> bool {
    let (Some(start), Some(end)) = (tilemap.world_to_tile(from), tilemap.world_to_tile(to)) else {
        return false;
    };

    let mut x = start.x as i64;
    let mut y = start.y as i64;
    let end_x = end.x as i64;
    let end_y = end.y as i64;
    let dx = (end_x - x).abs();
    let dy = -(end_y - y).abs();
    let step_x = if x < end_x { 1 } else { -1 };
    let step_y = if y < end_y { 1 } else { -1 };
    let mut error = dx + dy;

    loop {
        let tile = TileCoord {
            x: x as u32,
            y: y as u32,
        };
        let is_endpoint = tile == start || tile == end;
        if !is_endpoint && !tilemap.is_tile_walkable(tile) {
            return false;
        }
        if x == end_x && y == end_y {
            return true;
        }
        let doubled = error * 2;
        if doubled >= dy {
            error += dy;
            x += step_x;
        }
        if doubled <= dx {
            error += dx;
            y += step_y;
        }
    }
}

pub(crate) fn find_path_tiles(
    tilemap: &Tilemap,
    start: TileCoord,
    goal: TileCoord,
    max_expanded: usize,
) -> Option<Vec<TileCoord>> {
    let start_index = tilemap.index_of(start)?;
    let goal_index = tilemap.index_of(goal)?;
    if !tilemap.is_tile_walkable(start) || !tilemap.is_tile_walkable(goal) {
        return None;
    }

    if start == goal {
        return Some(vec![start]);
    }

    let node_count = tilemap.width() as usize * tilemap.height() as usize;
    let mut closed = vec![false; node_count];
    let mut best_g = vec![u32::MAX; node_count];
    let mut parent = vec![None::<usize>; node_count];
    let mut open = Vec::new();
    let mut next_insertion = 0u64;
    let mut expanded = 0usize;

    let start_h = octile_distance(start, goal);
    open.push(OpenNode {
        coord: start,
        h_cost: start_h,
        f_cost: start_h,
        insertion_order: next_insertion,
    });
    next_insertion = next_insertion.saturating_add(1);
    best_g[start_index] = 0;

    while !open.is_empty() {
        if expanded >= max_expanded {
            return None;
        }
        let best_index = pick_best_open_node_index(&open);
        let current = open.swap_remove(best_index);
        let Some(current_index) = tilemap.index_of(current.coord) else {
            continue;
        };
        if closed[current_index] {
            continue;
        }
        closed[current_index] = true;
        expanded = expanded.saturating_add(1);

        if current.coord == goal {
            return reconstruct_tile_path(tilemap, &parent, start_index, goal_index);
        }

        let current_g = best_g[current_index];
        for (neighbor, step_cost) in neighbors(tilemap, current.coord).into_iter().flatten() {
            let Some(neighbor_index) = tilemap.index_of(neighbor) else {
                continue;
            };
            if closed[neighbor_index] {
                continue;
            }

            let tentative_g = current_g.saturating_add(step_cost);
            if tentative_g >= best_g[neighbor_index] {
                continue;
            }

            best_g[neighbor_index] = tentative_g;
            parent[neighbor_index] = Some(current_index);
            let h_cost = octile_distance(neighbor, goal);
            open.push(OpenNode {
                coord: neighbor,
                h_cost,
                f_cost: tentative_g.saturating_add(h_cost),
                insertion_order: next_insertion,
            });
            next_insertion = next_insertion.saturating_add(1);
        }
    }

    None
}

/// Walkable 8-neighbourhood; diagonals may not cut a blocked corner.
fn neighbors(tilemap: &Tilemap, coord: TileCoord) -> [Option<(TileCoord, u32)>; 8] {
    let mut out = [None; 8];
    let offsets: [(i64, i64); 8] = [
        (0, 1),
        (1, 1),
        (1, 0),
        (1, -1),
        (0, -1),
        (-1, -1),
        (-1, 0),
        (-1, 1),
    ];
    for (slot, (dx, dy)) in offsets.into_iter().enumerate() {
        let Some(neighbor) = offset_coord(tilemap, coord, dx, dy) else {
            continue;
        };
        if !tilemap.is_tile_walkable(neighbor) {
            continue;
        }
        let diagonal = dx != 0 && dy != 0;
        if diagonal {
            let side_a = offset_coord(tilemap, coord, dx, 0);
            let side_b = offset_coord(tilemap, coord, 0, dy);
            let corner_open = side_a.is_some_and(|tile| tilemap.is_tile_walkable(tile))
                && side_b.is_some_and(|tile| tilemap.is_tile_walkable(tile));
            if !corner_open {
                continue;
            }
        }
        let cost = if diagonal { DIAGONAL_COST } else { STRAIGHT_COST };
        out[slot] = Some((neighbor, cost));
    }
    out
}

fn offset_coord(tilemap: &Tilemap, coord: TileCoord, dx: i64, dy: i64) -> Option<TileCoord> {
    let x = coord.x as i64 + dx;
    let y = coord.y as i64 + dy;
    if x < 0 || y < 0 || x >= tilemap.width() as i64 || y >= tilemap.height() as i64 {
        return None;
    }
    Some(TileCoord {
        x: x as u32,
        y: y as u32,
    })
}

#[derive(Debug, Clone, Copy)]
struct OpenNode {
    coord: TileCoord,
    h_cost: u32,
    f_cost: u32,
    insertion_order: u64,
}

fn pick_best_open_node_index(open: &[OpenNode]) -> usize {
    let mut best_index = 0usize;
    for index in 1..open.len() {
        if open_node_order_key(open[index]) < open_node_order_key(open[best_index]) {
            best_index = index;
        }
    }
    best_index
}

fn open_node_order_key(node: OpenNode) -> (u32, u32, u32, u32, u64) {
    (
        node.f_cost,
        node.h_cost,
        node.coord.y,
        node.coord.x,
        node.insertion_order,
    )
}

fn reconstruct_tile_path(
    tilemap: &Tilemap,
    parent: &[Option<usize>],
    start_index: usize,
    goal_index: usize,
) -> Option<Vec<TileCoord>> {
    let mut cursor = goal_index;
    let mut indices = vec![cursor];

    while cursor != start_index {
        cursor = parent.get(cursor).and_then(|value| *value)?;
        indices.push(cursor);
    }
    indices.reverse();
    Some(
        indices
            .into_iter()
            .map(|index| tilemap.coord_of(index))
            .collect(),
    )
}

fn octile_distance(a: TileCoord, b: TileCoord) -> u32 {
    let dx = a.x.abs_diff(b.x);
    let dy = a.y.abs_diff(b.y);
    let diagonal = dx.min(dy);
    let straight = dx.max(dy) - diagonal;
    diagonal
        .saturating_mul(DIAGONAL_COST)
        .saturating_add(straight.saturating_mul(STRAIGHT_COST))
}

#[cfg(test)]
mod tests {
    use super::super::tilemap::BLOCKED_TILE_ID;
    use super::*;

    fn walled_map() -> Tilemap {
        // Vertical wall at x=3 with a gap at y=4.
        let width = 7u32;
        let height = 5u32;
        let mut tiles = vec![0u16; (width * height) as usize];
        for y in 0..height {
            if y != 4 {
                tiles[(y * width + 3) as usize] = BLOCKED_TILE_ID;
            }
        }
        Tilemap::new(width, height, Vec2::default(), tiles).expect("tilemap")
    }

    #[test]
    fn path_never_steps_onto_blocked_tile() {
        let tilemap = walled_map();
        let path = find_path(
            &tilemap,
            Vec2::new(1.5, 2.5),
            Vec2::new(5.5, 2.5),
            DEFAULT_MAX_EXPANDED_NODES,
        )
        .expect("expected reachable path");
        assert!(!path.is_empty());
        assert_eq!(path.last().copied(), Some(Vec2::new(5.5, 2.5)));
        for waypoint in path {
            assert!(tilemap.is_walkable(waypoint), "{waypoint:?} is blocked");
        }
    }

    #[test]
    fn path_is_deterministic_on_symmetric_map() {
        let mut tilemap = Tilemap::open(5, 5, Vec2::default()).expect("tilemap");
        tilemap.set_tile(2, 2, BLOCKED_TILE_ID);
        let first = find_path(&tilemap, Vec2::new(0.5, 2.5), Vec2::new(4.5, 2.5), 256);
        let second = find_path(&tilemap, Vec2::new(0.5, 2.5), Vec2::new(4.5, 2.5), 256);
        assert!(first.is_some());
        assert_eq!(first, second);
    }

    #[test]
    fn expansion_budget_abandons_search() {
        let tilemap = walled_map();
        assert!(find_path(&tilemap, Vec2::new(0.5, 0.5), Vec2::new(6.5, 0.5), 3).is_none());
    }

    #[test]
    fn walls_block_line_of_sight() {
        let tilemap = walled_map();
        assert!(!line_of_sight(
            &tilemap,
            Vec2::new(1.5, 1.5),
            Vec2::new(5.5, 1.5)
        ));
        assert!(line_of_sight(
            &tilemap,
            Vec2::new(1.5, 4.5),
            Vec2::new(5.5, 4.5)
        ));
        assert!(line_of_sight(
            &tilemap,
            Vec2::new(0.5, 0.5),
            Vec2::new(2.5, 3.5)
        ));
    }
}
