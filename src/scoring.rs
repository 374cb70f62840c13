//! Scoring functions for knowledge graph embeddings.
//!
//! | Model | Score | Geometry |
//! |-------|-------|----------|
//! | TransE | -‖h + r - t‖ | Translation |
//! | DistMult | ⟨h, r, t⟩ | Bilinear diagonal |
//! | ComplEx | Re(⟨h, r, conj(t)⟩) | Complex bilinear |
//! | RotatE | -‖h ∘ r - t‖ | Complex rotation |
//!
//! Complex models treat vectors as interleaved `[re, im, re, im, ...]` pairs,
//! so their dimension must be even.
//!
//! Each function also provides its analytic partial derivatives, which the
//! reference [`EmbeddingModel`](crate::models::EmbeddingModel) uses for
//! `backward`.

use serde::{Deserialize, Serialize};

/// Floor for norms in distance-based gradients.
const MIN_NORM: f32 = 1e-9;

/// Common scoring functions for KGE models.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScoringFunction {
    /// TransE: -||h + r - t|| (Bordes et al. 2013).
    TransE,
    /// DistMult: <h, r, t> (Yang et al. 2015). Symmetric by construction.
    DistMult,
    /// ComplEx: Re(<h, r, conj(t)>) (Trouillon et al. 2016).
    ComplEx,
    /// RotatE: -||h ∘ r - t|| in complex space (Sun et al. 2019).
    RotatE,
}

/// Partial derivatives of one score with respect to h, r and t.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoreGradient {
    pub head: Vec<f32>,
    pub relation: Vec<f32>,
    pub tail: Vec<f32>,
}

impl ScoringFunction {
    /// Whether embeddings are interleaved complex pairs.
    pub fn is_complex(&self) -> bool {
        matches!(self, Self::ComplEx | Self::RotatE)
    }

    /// Compute score for embeddings. Higher is more plausible.
    pub fn score(&self, head: &[f32], relation: &[f32], tail: &[f32]) -> f32 {
        match self {
            Self::TransE => score_transe(head, relation, tail),
            Self::DistMult => score_distmult(head, relation, tail),
            Self::ComplEx => score_complex(head, relation, tail),
            Self::RotatE => score_rotate(head, relation, tail),
        }
    }

    /// ∂score/∂h, ∂score/∂r, ∂score/∂t.
    pub fn gradient(&self, head: &[f32], relation: &[f32], tail: &[f32]) -> ScoreGradient {
        match self {
            Self::TransE => grad_transe(head, relation, tail),
            Self::DistMult => grad_distmult(head, relation, tail),
            Self::ComplEx => grad_complex(head, relation, tail),
            Self::RotatE => grad_rotate(head, relation, tail),
        }
    }
}

fn score_transe(head: &[f32], relation: &[f32], tail: &[f32]) -> f32 {
    let mut sum_sq = 0.0;
    for i in 0..head.len() {
        let diff = head[i] + relation[i] - tail[i];
        sum_sq += diff * diff;
    }
    -sum_sq.sqrt()
}

fn grad_transe(head: &[f32], relation: &[f32], tail: &[f32]) -> ScoreGradient {
    let diff: Vec<f32> = (0..head.len())
        .map(|i| head[i] + relation[i] - tail[i])
        .collect();
    let norm = diff.iter().map(|d| d * d).sum::<f32>().sqrt().max(MIN_NORM);
    let toward: Vec<f32> = diff.iter().map(|d| -d / norm).collect();
    let tail = diff.iter().map(|d| d / norm).collect();
    ScoreGradient {
        head: toward.clone(),
        relation: toward,
        tail,
    }
}

fn score_distmult(head: &[f32], relation: &[f32], tail: &[f32]) -> f32 {
    let mut score = 0.0;
    for i in 0..head.len() {
        score += head[i] * relation[i] * tail[i];
    }
    score
}

fn grad_distmult(head: &[f32], relation: &[f32], tail: &[f32]) -> ScoreGradient {
    let n = head.len();
    ScoreGradient {
        head: (0..n).map(|i| relation[i] * tail[i]).collect(),
        relation: (0..n).map(|i| head[i] * tail[i]).collect(),
        tail: (0..n).map(|i| head[i] * relation[i]).collect(),
    }
}

fn score_complex(head: &[f32], relation: &[f32], tail: &[f32]) -> f32 {
    let dim = head.len() / 2;
    let mut score = 0.0;
    for i in 0..dim {
        let (h_re, h_im) = (head[2 * i], head[2 * i + 1]);
        let (r_re, r_im) = (relation[2 * i], relation[2 * i + 1]);
        let (t_re, t_im) = (tail[2 * i], tail[2 * i + 1]);

        // (h * r) * conj(t), real part
        let x = h_re * r_re - h_im * r_im;
        let y = h_re * r_im + h_im * r_re;
        score += x * t_re + y * t_im;
    }
    score
}

fn grad_complex(head: &[f32], relation: &[f32], tail: &[f32]) -> ScoreGradient {
    let n = head.len();
    let mut g = ScoreGradient {
        head: vec![0.0; n],
        relation: vec![0.0; n],
        tail: vec![0.0; n],
    };
    for i in 0..n / 2 {
        let (re, im) = (2 * i, 2 * i + 1);
        let (h_re, h_im) = (head[re], head[im]);
        let (r_re, r_im) = (relation[re], relation[im]);
        let (t_re, t_im) = (tail[re], tail[im]);

        g.head[re] = t_re * r_re + t_im * r_im;
        g.head[im] = t_im * r_re - t_re * r_im;
        g.relation[re] = t_re * h_re + t_im * h_im;
        g.relation[im] = t_im * h_re - t_re * h_im;
        g.tail[re] = h_re * r_re - h_im * r_im;
        g.tail[im] = h_re * r_im + h_im * r_re;
    }
    g
}

fn score_rotate(head: &[f32], relation: &[f32], tail: &[f32]) -> f32 {
    let dim = head.len() / 2;
    let mut sum_sq = 0.0;
    for i in 0..dim {
        let (d_re, d_im) = rotate_residual(head, relation, tail, i);
        sum_sq += d_re * d_re + d_im * d_im;
    }
    -sum_sq.sqrt()
}

fn grad_rotate(head: &[f32], relation: &[f32], tail: &[f32]) -> ScoreGradient {
    let n = head.len();
    let residuals: Vec<(f32, f32)> = (0..n / 2)
        .map(|i| rotate_residual(head, relation, tail, i))
        .collect();
    let norm = residuals
        .iter()
        .map(|(a, b)| a * a + b * b)
        .sum::<f32>()
        .sqrt()
        .max(MIN_NORM);

    let mut g = ScoreGradient {
        head: vec![0.0; n],
        relation: vec![0.0; n],
        tail: vec![0.0; n],
    };
    for (i, &(d_re, d_im)) in residuals.iter().enumerate() {
        let (re, im) = (2 * i, 2 * i + 1);
        let (d_re, d_im) = (d_re / norm, d_im / norm);
        let (h_re, h_im) = (head[re], head[im]);
        let (r_re, r_im) = (relation[re], relation[im]);

        g.head[re] = -(d_re * r_re + d_im * r_im);
        g.head[im] = -(d_im * r_re - d_re * r_im);
        g.relation[re] = -(d_re * h_re + d_im * h_im);
        g.relation[im] = -(d_im * h_re - d_re * h_im);
        g.tail[re] = d_re;
        g.tail[im] = d_im;
    }
    g
}

/// Component `i` of h ∘ r - t.
#[inline]
fn rotate_residual(head: &[f32], relation: &[f32], tail: &[f32], i: usize) -> (f32, f32) {
    let (h_re, h_im) = (head[2 * i], head[2 * i + 1]);
    let (r_re, r_im) = (relation[2 * i], relation[2 * i + 1]);
    let rot_re = h_re * r_re - h_im * r_im;
    let rot_im = h_re * r_im + h_im * r_re;
    (rot_re - tail[2 * i], rot_im - tail[2 * i + 1])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transe_scoring() {
        // h + r = t should have score close to 0 (best)
        let h = vec![1.0, 0.0, 0.0];
        let r = vec![0.0, 1.0, 0.0];
        let t = vec![1.0, 1.0, 0.0];

        let score = ScoringFunction::TransE.score(&h, &r, &t);
        assert!((score - 0.0).abs() < 1e-6);
    }

    #[test]
    fn test_distmult_scoring() {
        let h = vec![1.0, 0.5, 0.0];
        let r = vec![1.0, 1.0, 1.0];
        let t = vec![0.5, 1.0, 0.0];

        let score = ScoringFunction::DistMult.score(&h, &r, &t);
        assert!((score - 1.0).abs() < 1e-6); // 1*1*0.5 + 0.5*1*1 + 0*1*0 = 1.0
    }

    #[test]
    fn test_rotate_scoring() {
        // h = 1+0i, r = 0+1i (90 deg rotation), t = 0+1i
        let h = vec![1.0, 0.0];
        let r = vec![0.0, 1.0];
        let t = vec![0.0, 1.0];

        let score = ScoringFunction::RotatE.score(&h, &r, &t);
        assert!((score - 0.0).abs() < 1e-6);
    }

    #[test]
    fn test_complex_scoring() {
        let h = vec![1.0, 0.0];
        let r = vec![1.0, 0.0];
        let t = vec![1.0, 0.0];

        let score = ScoringFunction::ComplEx.score(&h, &r, &t);
        assert!((score - 1.0).abs() < 1e-6);
    }

    /// Central finite differences against the analytic gradient.
    fn check_gradient(f: ScoringFunction) {
        let h = vec![0.3, -0.2, 0.5, 0.1];
        let r = vec![-0.4, 0.7, 0.2, -0.3];
        let t = vec![0.1, 0.6, -0.5, 0.2];
        let g = f.gradient(&h, &r, &t);
        let eps = 1e-3;

        for (which, analytic) in [&g.head, &g.relation, &g.tail].into_iter().enumerate() {
            for i in 0..4 {
                let mut args = [h.clone(), r.clone(), t.clone()];
                args[which][i] += eps;
                let plus = f.score(&args[0], &args[1], &args[2]);
                args[which][i] -= 2.0 * eps;
                let minus = f.score(&args[0], &args[1], &args[2]);
                let numeric = (plus - minus) / (2.0 * eps);
                assert!(
                    (numeric - analytic[i]).abs() < 1e-2,
                    "{:?} arg {} dim {}: numeric {} vs analytic {}",
                    f,
                    which,
                    i,
                    numeric,
                    analytic[i]
                );
            }
        }
    }

    #[test]
    fn test_gradients_match_finite_differences() {
        check_gradient(ScoringFunction::TransE);
        check_gradient(ScoringFunction::DistMult);
        check_gradient(ScoringFunction::ComplEx);
        check_gradient(ScoringFunction::RotatE);
    }
}
