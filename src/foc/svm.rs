// Space-vector modulation.
//
// Sector lookup by sign comparisons instead of atan2, then midpoint-centered
// on-times composed from the two active vectors. The linear range is the
// circle inscribed in the modulation hexagon, radius sqrt(3)/2; anything
// outside is rejected so the caller can fault instead of clipping.

const ONE_BY_SQRT3: f32 = 0.577_350_26;
const TWO_BY_SQRT3: f32 = 1.154_700_5;

/// Normalized on-times `(tA, tB, tC)` in [0, 1] for a modulation vector, or
/// None when the vector leaves the linear range.
pub fn svm(alpha: f32, beta: f32) -> Option<(f32, f32, f32)> {
    // Linear limit: inscribed-circle radius sqrt(3)/2.
    if alpha * alpha + beta * beta > 0.75 {
        return None;
    }

    let sextant = if beta >= 0.0 {
        if alpha >= 0.0 {
            // quadrant I
            if ONE_BY_SQRT3 * beta > alpha {
                2
            } else {
                1
            }
        } else {
            // quadrant II
            if -ONE_BY_SQRT3 * beta > alpha {
                3
            } else {
                2
            }
        }
    } else {
        if alpha >= 0.0 {
            // quadrant IV
            if -ONE_BY_SQRT3 * beta > alpha {
                5
            } else {
                6
            }
        } else {
            // quadrant III
            if ONE_BY_SQRT3 * beta > alpha {
                4
            } else {
                5
            }
        }
    };

    let (t_a, t_b, t_c);
    match sextant {
        // v1-v2
        1 => {
            let t1 = alpha - ONE_BY_SQRT3 * beta;
            let t2 = TWO_BY_SQRT3 * beta;
            t_a = (1.0 - t1 - t2) * 0.5;
            t_b = t_a + t1;
            t_c = t_b + t2;
        }
        // v2-v3
        2 => {
            let t2 = alpha + ONE_BY_SQRT3 * beta;
            let t3 = -alpha + ONE_BY_SQRT3 * beta;
            t_b = (1.0 - t2 - t3) * 0.5;
            t_a = t_b + t3;
            t_c = t_a + t2;
        }
        // v3-v4
        3 => {
            let t3 = TWO_BY_SQRT3 * beta;
            let t4 = -alpha - ONE_BY_SQRT3 * beta;
            t_b = (1.0 - t3 - t4) * 0.5;
            t_c = t_b + t3;
            t_a = t_c + t4;
        }
        // v4-v5
        4 => {
            let t4 = -alpha + ONE_BY_SQRT3 * beta;
            let t5 = -TWO_BY_SQRT3 * beta;
            t_c = (1.0 - t4 - t5) * 0.5;
            t_b = t_c + t5;
            t_a = t_b + t4;
        }
        // v5-v6
        5 => {
            let t5 = -alpha - ONE_BY_SQRT3 * beta;
            let t6 = alpha - ONE_BY_SQRT3 * beta;
            t_c = (1.0 - t5 - t6) * 0.5;
            t_a = t_c + t5;
            t_b = t_a + t6;
        }
        // v6-v1
        _ => {
            let t6 = -TWO_BY_SQRT3 * beta;
            let t1 = alpha + ONE_BY_SQRT3 * beta;
            t_a = (1.0 - t6 - t1) * 0.5;
            t_c = t_a + t1;
            t_b = t_c + t6;
        }
    }

    let in_range = t_a >= 0.0
        && t_a <= 1.0
        && t_b >= 0.0
        && t_b <= 1.0
        && t_c >= 0.0
        && t_c <= 1.0;
    if in_range {
        Some((t_a, t_b, t_c))
    } else {
        None
    }
}
