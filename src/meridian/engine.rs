//! Ring management: the periodic Gram-Schmidt + hypervolume-maximization
//! reduce step of spec §4.4.
//!
//! The hypervolume procedure is reproduced as specified rather than
//! independently re-derived (spec design note 9): shift rows by the last
//! row, QR-decompose, project through `Q`, drop the last column, and take
//! the Gram-determinant volume of what remains. No convex-hull crate exists
//! in the dependency stack this crate draws from, so the Gram determinant
//! (`sqrt(det(A·Aᵀ))`) stands in for "the convex hull's volume" of the
//! projected point set.

use nalgebra::DMatrix;

use crate::error::RingError;
use crate::ids::ParticipantId;
use crate::meridian::ring::{Membership, RingSet, MAX_RINGS};

fn latency_to(coords: &[(ParticipantId, f64)], id: ParticipantId) -> f64 {
    coords.iter().find(|(other, _)| *other == id).map(|(_, lat)| *lat).unwrap_or(f64::NAN)
}

fn hypervolume(m: &DMatrix<f64>) -> f64 {
    let n = m.nrows();
    if n < 2 {
        return 0.0;
    }
    let last_row = m.row(n - 1).clone_owned();
    let mut shifted = m.clone();
    for mut row in shifted.row_iter_mut() {
        row -= &last_row;
    }
    let qr = shifted.clone().qr();
    let q = qr.q();
    let projected = q * shifted.transpose();
    let keep = projected.ncols().saturating_sub(1);
    if keep == 0 {
        return 0.0;
    }
    let reduced = projected.columns(0, keep).clone_owned();
    let gram = &reduced * reduced.transpose();
    gram.determinant().abs().sqrt()
}

/// Runs one ring-management cycle for `ring_number` on this node's ring-set.
///
/// `self_id`/`self_coords` describe this node's own measured latency vector
/// (used as the implicit first row/column of the matrix, per spec §4.4
/// step 1 "self plus primary∪secondary members").
pub fn manage_ring(
    self_id: ParticipantId,
    self_coords: &[(ParticipantId, f64)],
    ring_set: &mut RingSet,
    ring_number: u32,
) -> Result<(), RingError> {
    if ring_number == 0 || ring_number > MAX_RINGS {
        return Err(RingError::OutOfRange(ring_number, MAX_RINGS));
    }
    let k = ring_set.primary_capacity;

    let mut members: Vec<Membership> = Vec::new();
    {
        let ring = ring_set.ring(ring_number).expect("validated range above");
        members.extend(ring.members.iter().cloned());
        members.extend(ring.secondary.iter().cloned());
    }

    let critical = ((k + 1) * (k + 1)) as usize;
    if members.len() + 1 < critical {
        return Err(RingError::SubCriticalMatrix(ring_number));
    }

    let mut ids: Vec<ParticipantId> = std::iter::once(self_id).chain(members.iter().map(|m| m.id)).collect();
    let mut coord_lookup: Vec<&[(ParticipantId, f64)]> =
        std::iter::once(self_coords).chain(members.iter().map(|m| m.coordinates.as_slice())).collect();

    let build_matrix = |ids: &[ParticipantId], coords: &[&[(ParticipantId, f64)]]| -> DMatrix<f64> {
        let n = ids.len();
        DMatrix::from_fn(n, n, |i, j| if i == j { 0.0 } else { latency_to(coords[i], ids[j]) })
    };

    let mut matrix = build_matrix(&ids, &coord_lookup);
    if matrix.iter().any(|v| v.is_nan()) {
        return Err(RingError::NonFiniteMatrix(ring_number));
    }

    ring_set.freeze(ring_number)?;

    let total_drops = ids.len().saturating_sub(1 + k);
    let mut dropped: Vec<ParticipantId> = Vec::new();

    for _ in 0..total_drops {
        if ids.len() <= 1 {
            break;
        }
        let mut worst_idx = 1;
        let mut best_volume = f64::NEG_INFINITY;
        for candidate in 1..ids.len() {
            let remaining_ids: Vec<ParticipantId> =
                ids.iter().enumerate().filter(|(i, _)| *i != candidate).map(|(_, id)| *id).collect();
            let remaining_coords: Vec<&[(ParticipantId, f64)]> =
                coord_lookup.iter().enumerate().filter(|(i, _)| *i != candidate).map(|(_, c)| *c).collect();
            let sub = build_matrix(&remaining_ids, &remaining_coords);
            let vol = hypervolume(&sub);
            if vol > best_volume {
                best_volume = vol;
                worst_idx = candidate;
            }
        }
        dropped.push(ids[worst_idx]);
        ids.remove(worst_idx);
        coord_lookup.remove(worst_idx);
        matrix = build_matrix(&ids, &coord_lookup);
        let _ = &matrix;
    }

    let new_primary: Vec<ParticipantId> = ids.into_iter().skip(1).collect();
    let member_by_id = |id: ParticipantId| -> Membership {
        members
            .iter()
            .find(|m| m.id == id)
            .cloned()
            .unwrap_or(Membership { id, latency: f64::NAN, prev_ring: ring_number, coordinates: Vec::new() })
    };

    {
        let ring = &mut ring_set.rings_mut()[(ring_number - 1) as usize];
        ring.members = new_primary.into_iter().map(member_by_id).collect();
        ring.secondary = dropped.into_iter().map(member_by_id).collect();
    }

    ring_set.unfreeze(ring_number)?;
    Ok(())
}
