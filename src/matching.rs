//! Detection-to-track association.
//!
//! Pairwise IoU between detections and predicted track boxes, solved as a
//! minimum-cost assignment over `1 - IoU`, then filtered by an IoU threshold.

use nalgebra::DMatrix;

use crate::detection::BBox;
use crate::internal::optimize::linear_sum_assignment;

/// Intersection over union of two boxes.
///
/// 0 for disjoint boxes (and for degenerate pairs with no union area),
/// 1 for identical non-degenerate boxes.
pub fn iou(a: &BBox, b: &BBox) -> f64 {
    let inter_w = (a.x2.min(b.x2) - a.x1.max(b.x1)).max(0.0);
    let inter_h = (a.y2.min(b.y2) - a.y1.max(b.y1)).max(0.0);
    let inter = inter_w * inter_h;
    let union = a.area() + b.area() - inter;

    if union > 0.0 && inter.is_finite() {
        inter / union
    } else {
        0.0
    }
}

/// IoU matrix of shape `(detections.len(), tracks.len())`.
pub fn iou_matrix(detections: &[BBox], tracks: &[BBox]) -> DMatrix<f64> {
    DMatrix::from_fn(detections.len(), tracks.len(), |i, j| {
        iou(&detections[i], &tracks[j])
    })
}

/// Result of one association round. Indices refer to the input slices.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Association {
    /// `(detection_idx, track_idx)` pairs, sorted by detection index.
    pub matches: Vec<(usize, usize)>,
    /// Detections without a track, ascending.
    pub unmatched_detections: Vec<usize>,
    /// Tracks without a detection, ascending.
    pub unmatched_tracks: Vec<usize>,
}

/// Assign detections to predicted track boxes.
///
/// When every row and column of the thresholded IoU matrix holds at most
/// one candidate the candidates are taken directly; otherwise the full
/// assignment problem over `1 - IoU` is solved. Pairs with IoU below
/// `iou_threshold` are always returned to the unmatched sets.
pub fn associate_detections_to_tracks(
    detections: &[BBox],
    tracks: &[BBox],
    iou_threshold: f64,
) -> Association {
    let n_det = detections.len();
    let n_trk = tracks.len();

    if n_det == 0 || n_trk == 0 {
        return Association {
            matches: Vec::new(),
            unmatched_detections: (0..n_det).collect(),
            unmatched_tracks: (0..n_trk).collect(),
        };
    }

    let ious = iou_matrix(detections, tracks);

    let candidates = match unique_candidates(&ious, iou_threshold) {
        Some(pairs) => pairs,
        None => linear_sum_assignment(&ious.map(|v| 1.0 - v)),
    };

    let mut matched_dets = vec![false; n_det];
    let mut matched_trks = vec![false; n_trk];
    let mut matches = Vec::with_capacity(candidates.len());

    for (d, t) in candidates {
        if ious[(d, t)] < iou_threshold {
            continue;
        }
        matched_dets[d] = true;
        matched_trks[t] = true;
        matches.push((d, t));
    }

    Association {
        matches,
        unmatched_detections: get_unmatched(&matched_dets),
        unmatched_tracks: get_unmatched(&matched_trks),
    }
}

/// Fast path: pairs over threshold when no row or column is contested.
fn unique_candidates(ious: &DMatrix<f64>, iou_threshold: f64) -> Option<Vec<(usize, usize)>> {
    let mut col_hits = vec![0_usize; ious.ncols()];
    let mut pairs = Vec::new();

    for i in 0..ious.nrows() {
        let mut row_hits = 0;
        for j in 0..ious.ncols() {
            if ious[(i, j)] >= iou_threshold {
                row_hits += 1;
                col_hits[j] += 1;
                if row_hits > 1 || col_hits[j] > 1 {
                    return None;
                }
                pairs.push((i, j));
            }
        }
    }

    Some(pairs)
}

/// Indices whose flag is unset.
fn get_unmatched(matched: &[bool]) -> Vec<usize> {
    matched
        .iter()
        .enumerate()
        .filter(|(_, &m)| !m)
        .map(|(i, _)| i)
        .collect()
}
