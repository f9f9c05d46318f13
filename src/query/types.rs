//! Shared query-facing types.

/// Which submaps a query call runs against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmapSelector {
    /// Reduce across every submap in the set.
    All,
    /// Query exactly one submap, by its index in the set.
    Single(usize),
}

/// Execution backend for a query call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryBackend {
    Cpu,
    Gpu,
}

/// Widen `N x 3` point queries into the `N x 4` sphere-query layout by
/// appending a zero radius to each row. Point and sphere queries share one
/// code path; a zero radius makes them numerically identical.
pub fn with_zero_radii(points: &[[f32; 3]]) -> Vec<[f32; 4]> {
    points
        .iter()
        .map(|p| [p[0], p[1], p[2], 0.0])
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_with_zero_radii() {
        let points = [[1.0, 2.0, 3.0], [-0.5, 0.0, 7.25]];
        let widened = with_zero_radii(&points);
        assert_eq!(widened, vec![[1.0, 2.0, 3.0, 0.0], [-0.5, 0.0, 7.25, 0.0]]);
    }
}
