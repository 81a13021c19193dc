use crate::tensor::view::Plane;
use crate::EPS;
use nalgebra::{DMatrix, DVector, SMatrix, SVector};

/// Reads the response at a possibly negative or overflowing coordinate by
/// wrapping around the periodic surface.
pub(crate) fn response_circular(response: &Plane<f32>, x: i64, y: i64) -> f32 {
    let w = response.width() as i64;
    let h = response.height() as i64;
    response.get(y.rem_euclid(h) as usize, x.rem_euclid(w) as usize)
}

/// Sub-pixel peak location from a 2D quadratic fit
/// `f(x, y) = a*x^2 + b*x*y + c*y^2 + d*x + e*y + f` over the discrete peak
/// and its eight circular neighbours. The analytic optimum is kept only if
/// the curvature determinant is positive and the optimum stays within one
/// pixel of the discrete peak; otherwise the discrete peak wins.
pub(crate) fn sub_pixel_peak(response: &Plane<f32>, peak_x: i64, peak_y: i64) -> (f32, f32) {
    let neighbourhood: [(i64, i64); 9] = [
        (peak_x - 1, peak_y - 1),
        (peak_x, peak_y - 1),
        (peak_x + 1, peak_y - 1),
        (peak_x - 1, peak_y),
        (peak_x + 1, peak_y),
        (peak_x - 1, peak_y + 1),
        (peak_x, peak_y + 1),
        (peak_x + 1, peak_y + 1),
        (peak_x, peak_y),
    ];

    let mut design = SMatrix::<f32, 9, 6>::zeros();
    let mut values = SVector::<f32, 9>::zeros();
    for (row, (x, y)) in neighbourhood.iter().enumerate() {
        let (xf, yf) = (*x as f32, *y as f32);
        design[(row, 0)] = xf * xf;
        design[(row, 1)] = xf * yf;
        design[(row, 2)] = yf * yf;
        design[(row, 3)] = xf;
        design[(row, 4)] = yf;
        design[(row, 5)] = 1.0;
        values[row] = response_circular(response, *x, *y);
    }

    let discrete = (peak_x as f32, peak_y as f32);
    let svd = design.svd(true, true);
    let coefficients = match svd.solve(&values, EPS) {
        Ok(c) => c,
        Err(_) => return discrete,
    };
    let (a, b, c, d, e) = (
        coefficients[0],
        coefficients[1],
        coefficients[2],
        coefficients[3],
        coefficients[4],
    );

    let determinant = 4.0 * a * c - b * b;
    if determinant <= EPS {
        return discrete;
    }
    let x = (b * e - 2.0 * c * d) / determinant;
    let y = (b * d - 2.0 * a * e) / determinant;
    if (x - discrete.0).abs() > 1.0 || (y - discrete.1).abs() > 1.0 {
        return discrete;
    }
    (x, y)
}

/// Least-squares parabola `f(x) = a*x^2 + b*x + c` through the sampled
/// responses; returns the vertex when the fit is a proper maximum.
pub(crate) fn parabola_vertex(positions: &[f32], responses: &[f32]) -> Option<f32> {
    assert_eq!(positions.len(), responses.len());
    assert!(positions.len() >= 3);

    let design = DMatrix::<f32>::from_fn(positions.len(), 3, |row, col| match col {
        0 => positions[row] * positions[row],
        1 => positions[row],
        _ => 1.0,
    });
    let values = DVector::<f32>::from_column_slice(responses);

    let svd = design.svd(true, true);
    let coefficients = svd.solve(&values, EPS).ok()?;
    let (a, b) = (coefficients[0], coefficients[1]);
    if a < -EPS {
        Some(-b / (2.0 * a))
    } else {
        None
    }
}

/// Sub-grid refinement along one axis (scale or angle). A boundary index
/// keeps the tested grid value; an interior index is refined through the
/// parabola over its two immediate neighbours, falling back to the grid
/// value on a degenerate fit. An index outside the grid is interpolated
/// from the full axis.
pub(crate) fn sub_grid_axis(grid: &[f32], responses: &[f32], index: usize) -> f32 {
    assert_eq!(grid.len(), responses.len());

    if index >= grid.len() {
        return parabola_vertex(grid, responses).unwrap_or(grid[grid.len() / 2]);
    }
    if index == 0 || index == grid.len() - 1 {
        return grid[index];
    }
    parabola_vertex(&grid[index - 1..=index + 1], &responses[index - 1..=index + 1])
        .unwrap_or(grid[index])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tensor::RealTensor;

    fn quadratic_response(width: usize, height: usize, px: f32, py: f32) -> RealTensor {
        // concave paraboloid peaking at (px, py)
        RealTensor::from_data(
            (0..height)
                .flat_map(|y| {
                    (0..width).map(move |x| {
                        let dx = x as f32 - px;
                        let dy = y as f32 - py;
                        10.0 - 0.5 * dx * dx - 0.3 * dy * dy
                    })
                })
                .collect(),
            1,
            1,
            height,
            width,
        )
    }

    #[test]
    fn recovers_fractional_peak() {
        let response = quadratic_response(16, 16, 7.3, 5.6);
        let t = response.plane(0, 0);
        let (x, y) = sub_pixel_peak(&t, 7, 6);
        assert!((x - 7.3).abs() < 1e-2, "x = {x}");
        assert!((y - 5.6).abs() < 1e-2, "y = {y}");
    }

    #[test]
    fn flat_surface_falls_back_to_discrete_peak() {
        let response = RealTensor::from_data(vec![1.0; 64], 1, 1, 8, 8);
        let t = response.plane(0, 0);
        let (x, y) = sub_pixel_peak(&t, 3, 4);
        assert_eq!((x, y), (3.0, 4.0));
    }

    #[test]
    fn distant_optimum_is_rejected() {
        // well-conditioned fit whose analytic optimum sits more than one
        // pixel from the queried discrete peak
        let response = quadratic_response(32, 32, 10.5, 5.0);
        let t = response.plane(0, 0);
        let (x, y) = sub_pixel_peak(&t, 5, 5);
        assert_eq!((x, y), (5.0, 5.0));
    }

    #[test]
    fn circular_reads_wrap() {
        let mut response = RealTensor::zeros(1, 1, 4, 4);
        response.plane_mut(0, 0).set(3, 3, 5.0);
        let t = response.plane(0, 0);
        assert_eq!(response_circular(&t, -1, -1), 5.0);
        assert_eq!(response_circular(&t, 7, 7), 5.0);
    }

    #[test]
    fn interior_axis_index_is_refined() {
        let grid = [0.9, 1.0, 1.1];
        // responses peak between the middle and the last sample
        let responses = [0.2, 0.9, 0.8];
        let refined = sub_grid_axis(&grid, &responses, 1);
        assert!(refined > 1.0 && refined < 1.1, "refined = {refined}");
    }

    #[test]
    fn boundary_axis_index_keeps_grid_value() {
        let grid = [0.9, 1.0, 1.1];
        let responses = [0.9, 0.5, 0.2];
        assert_eq!(sub_grid_axis(&grid, &responses, 0), 0.9);
        assert_eq!(sub_grid_axis(&grid, &responses, 2), 1.1);
    }

    #[test]
    fn degenerate_axis_fit_keeps_grid_value() {
        let grid = [0.9, 1.0, 1.1];
        let responses = [0.5, 0.5, 0.5];
        assert_eq!(sub_grid_axis(&grid, &responses, 1), 1.0);
    }
}
