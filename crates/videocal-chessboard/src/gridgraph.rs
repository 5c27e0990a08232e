use crate::corner::Corner;
use crate::geom::{angle_diff_abs, axis_vec_diff, is_orthogonal};
use crate::params::GridGraphParams;
use kiddo::{KdTree, SquaredEuclidean};
use nalgebra::Vector2;
use std::collections::{HashMap, VecDeque};
use std::f32::consts::{FRAC_PI_2, FRAC_PI_4};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum NeighborDirection {
    Right,
    Left,
    Up,
    Down,
}

impl NeighborDirection {
    fn slot(self) -> usize {
        match self {
            Self::Right => 0,
            Self::Left => 1,
            Self::Up => 2,
            Self::Down => 3,
        }
    }

    fn step(self) -> (i32, i32) {
        match self {
            Self::Right => (1, 0),
            Self::Left => (-1, 0),
            Self::Up => (0, -1),
            Self::Down => (0, 1),
        }
    }
}

#[derive(Debug, Clone)]
pub struct NodeNeighbor {
    pub direction: NeighborDirection,
    pub index: usize,
    pub distance: f32,
    pub score: f32,
}

/// Integer grid position assigned to a corner.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct GridNode {
    pub index: usize,
    pub i: i32,
    pub j: i32,
}

fn direction_quadrant(v: &Vector2<f32>) -> NeighborDirection {
    if v.x.abs() > v.y.abs() {
        if v.x >= 0.0 {
            NeighborDirection::Right
        } else {
            NeighborDirection::Left
        }
    } else if v.y >= 0.0 {
        NeighborDirection::Down
    } else {
        NeighborDirection::Up
    }
}

fn is_good_neighbor(
    corner: &Corner,
    neighbor: &Corner,
    neighbor_index: usize,
    params: &GridGraphParams,
) -> Option<NodeNeighbor> {
    let tol = params.orientation_tolerance_deg.to_radians();

    // Adjacent chessboard corners have swapped bright diagonals.
    if !is_orthogonal(corner.orientation, neighbor.orientation, tol) {
        return None;
    }

    let edge = neighbor.position - corner.position;
    let distance = edge.norm();
    if distance < params.min_spacing_pix || distance > params.max_spacing_pix {
        return None;
    }

    // Grid edges run at 45 degrees to both diagonals.
    let edge_angle = edge.y.atan2(edge.x);
    let score_corner = (axis_vec_diff(corner.orientation, edge_angle) - FRAC_PI_4).abs();
    let score_neighbor = (axis_vec_diff(neighbor.orientation, edge_angle) - FRAC_PI_4).abs();
    if score_corner > tol || score_neighbor > tol {
        return None;
    }

    let score_orientation =
        (FRAC_PI_2 - angle_diff_abs(corner.orientation, neighbor.orientation)).abs();

    Some(NodeNeighbor {
        direction: direction_quadrant(&edge),
        index: neighbor_index,
        distance,
        score: score_corner + score_neighbor + score_orientation,
    })
}

/// At most one neighbour per direction, lowest score then shortest edge.
fn select_neighbors(candidates: Vec<NodeNeighbor>) -> Vec<NodeNeighbor> {
    let mut best: [Option<NodeNeighbor>; 4] = [None, None, None, None];

    for candidate in candidates {
        let slot = &mut best[candidate.direction.slot()];
        let replace = match slot {
            None => true,
            Some(current) => {
                candidate.score < current.score
                    || (candidate.score == current.score && candidate.distance < current.distance)
            }
        };
        if replace {
            *slot = Some(candidate);
        }
    }

    best.into_iter().flatten().collect()
}

/// 4-connected neighbourhood graph over ChESS corners.
pub struct GridGraph {
    pub neighbors: Vec<Vec<NodeNeighbor>>,
}

impl GridGraph {
    pub fn new(corners: &[Corner], params: &GridGraphParams) -> Self {
        if corners.is_empty() {
            return Self {
                neighbors: Vec::new(),
            };
        }

        let coords = corners
            .iter()
            .map(|c| [c.position.x, c.position.y])
            .collect::<Vec<_>>();
        let tree: KdTree<f32, 2> = (&coords).into();
        let k = (params.k_neighbors + 1).min(corners.len());

        let neighbors = corners
            .iter()
            .enumerate()
            .map(|(i, corner)| {
                let query = [corner.position.x, corner.position.y];
                let candidates = tree
                    .nearest_n::<SquaredEuclidean>(&query, k)
                    .into_iter()
                    .map(|nn| nn.item as usize)
                    .filter(|&idx| idx != i)
                    .filter_map(|idx| is_good_neighbor(corner, &corners[idx], idx, params))
                    .collect();
                select_neighbors(candidates)
            })
            .collect();

        Self { neighbors }
    }

    pub fn connected_components(&self) -> Vec<Vec<usize>> {
        let mut visited = vec![false; self.neighbors.len()];
        let mut components = Vec::new();

        for start in 0..self.neighbors.len() {
            if visited[start] {
                continue;
            }

            let mut component = Vec::new();
            let mut stack = vec![start];
            while let Some(node) = stack.pop() {
                if visited[node] {
                    continue;
                }
                visited[node] = true;
                component.push(node);
                stack.extend(
                    self.neighbors[node]
                        .iter()
                        .map(|n| n.index)
                        .filter(|&idx| !visited[idx]),
                );
            }
            components.push(component);
        }

        components
    }

    /// BFS from the first node of `component`, assigning `(i, j)` steps.
    ///
    /// Returns `None` when two corners land on the same cell.
    pub fn assign_grid_coordinates(&self, component: &[usize]) -> Option<Vec<GridNode>> {
        let start = *component.first()?;
        let mut nodes = Vec::with_capacity(component.len());
        let mut visited = vec![false; self.neighbors.len()];
        let mut occupied: HashMap<(i32, i32), usize> = HashMap::new();
        let mut queue = VecDeque::from([(start, 0, 0)]);

        while let Some((index, i, j)) = queue.pop_front() {
            if visited[index] {
                continue;
            }
            visited[index] = true;
            if occupied.insert((i, j), index).is_some() {
                return None;
            }
            nodes.push(GridNode { index, i, j });

            for neighbor in &self.neighbors[index] {
                let (di, dj) = neighbor.direction.step();
                queue.push_back((neighbor.index, i + di, j + dj));
            }
        }

        Some(nodes)
    }
}

/// Shift grid nodes to start at `(0, 0)` and match them to a `cols x rows`
/// board, turning the labels a quarter turn when the board is seen rotated
/// by 90 degrees. Labels never mirror the board.
///
/// Returns `(corner index, board id)` pairs sorted by id, where
/// `id = j * cols + i`.
pub fn fit_to_board(nodes: &[GridNode], cols: u32, rows: u32) -> Option<Vec<(usize, u32)>> {
    let expected = cols as usize * rows as usize;
    if nodes.len() != expected {
        return None;
    }

    let min_i = nodes.iter().map(|n| n.i).min()?;
    let min_j = nodes.iter().map(|n| n.j).min()?;
    let width = (nodes.iter().map(|n| n.i).max()? - min_i + 1) as u32;
    let height = (nodes.iter().map(|n| n.j).max()? - min_j + 1) as u32;

    let quarter_turn = if (width, height) == (cols, rows) {
        false
    } else if (width, height) == (rows, cols) {
        true
    } else {
        return None;
    };

    let mut ids: Vec<(usize, u32)> = nodes
        .iter()
        .map(|n| {
            let (i, j) = ((n.i - min_i) as u32, (n.j - min_j) as u32);
            let (i, j) = if quarter_turn { (j, width - 1 - i) } else { (i, j) };
            (n.index, j * cols + i)
        })
        .collect();
    ids.sort_by_key(|&(_, id)| id);
    Some(ids)
}
