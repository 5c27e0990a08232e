use serde::{Deserialize, Serialize};

/// Neighbour search limits for the corner grid graph.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct GridGraphParams {
    pub min_spacing_pix: f32,
    pub max_spacing_pix: f32,
    pub k_neighbors: usize,
    pub orientation_tolerance_deg: f32,
}

impl Default for GridGraphParams {
    fn default() -> Self {
        Self {
            min_spacing_pix: 5.0,
            max_spacing_pix: 400.0,
            k_neighbors: 8,
            orientation_tolerance_deg: 22.5,
        }
    }
}

/// Board geometry plus detector tuning.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ChessboardParams {
    /// Inner corners along a board row.
    pub cols: u32,
    /// Inner corners along a board column.
    pub rows: u32,
    pub square_size_mm: f64,
    /// ChESS responses below this are dropped before grid assembly.
    pub min_strength: f32,
    /// Relative ChESS response threshold.
    pub threshold_rel: f32,
    pub nms_radius: u32,
    pub graph: GridGraphParams,
}

impl ChessboardParams {
    pub fn new(cols: u32, rows: u32, square_size_mm: f64) -> Self {
        Self {
            cols,
            rows,
            square_size_mm,
            ..Self::default()
        }
    }

    pub fn corner_count(&self) -> usize {
        self.cols as usize * self.rows as usize
    }
}

impl Default for ChessboardParams {
    fn default() -> Self {
        Self {
            cols: 14,
            rows: 10,
            square_size_mm: 3.0,
            min_strength: 0.0,
            threshold_rel: 0.2,
            nms_radius: 2,
            graph: GridGraphParams::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_json_keeps_defaults() {
        let p: ChessboardParams =
            serde_json::from_str(r#"{"cols": 9, "rows": 6}"#).expect("parse params");
        assert_eq!(54, p.corner_count());
        assert_eq!(3.0, p.square_size_mm);
        assert_eq!(GridGraphParams::default(), p.graph);
    }
}
