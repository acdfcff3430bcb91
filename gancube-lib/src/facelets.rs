//! Cube state in permutation/orientation form and its facelet encoding.
//!
//! The cube transmits 7 corners and 11 edges; the last corner and edge are
//! derived from the parity invariants that always hold on a physical cube
//! (corner orientations sum to 0 mod 3, edge orientations to 0 mod 2, and
//! permutations are complete).

use serde::{Deserialize, Serialize};

use crate::constants::{CORNER_FACELET_MAP, EDGE_FACELET_MAP, FACE_ORDER, SOLVED_FACELETS};

/// Corner/edge permutation and orientation arrays, the minimal state needed
/// to reconstruct the 54 facelets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CubeState {
    /// Corner permutation, a permutation of 0..8
    pub cp: [u8; 8],
    /// Corner orientation, values 0..3, sum divisible by 3
    pub co: [u8; 8],
    /// Edge permutation, a permutation of 0..12
    pub ep: [u8; 12],
    /// Edge orientation, values 0..2, sum divisible by 2
    pub eo: [u8; 12],
}

impl CubeState {
    /// State of a factory-solved cube.
    pub fn solved() -> Self {
        Self {
            cp: [0, 1, 2, 3, 4, 5, 6, 7],
            co: [0; 8],
            ep: [0, 1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11],
            eo: [0; 12],
        }
    }

    /// Build a state from the 7 corners and 11 edges carried on the wire,
    /// deriving the untransmitted eighth corner and twelfth edge.
    pub fn from_partial(cp: [u8; 7], co: [u8; 7], ep: [u8; 11], eo: [u8; 11]) -> Self {
        let cp_sum: u32 = cp.iter().map(|&v| u32::from(v)).sum();
        let co_sum: u32 = co.iter().map(|&v| u32::from(v)).sum();
        let ep_sum: u32 = ep.iter().map(|&v| u32::from(v)).sum();
        let eo_sum: u32 = eo.iter().map(|&v| u32::from(v)).sum();

        let mut state = Self::solved();
        state.cp[..7].copy_from_slice(&cp);
        state.co[..7].copy_from_slice(&co);
        state.ep[..11].copy_from_slice(&ep);
        state.eo[..11].copy_from_slice(&eo);
        // Wrapping keeps garbage wire data from panicking; an invalid frame
        // simply yields a non-solved state.
        state.cp[7] = 28u8.wrapping_sub(cp_sum as u8);
        state.co[7] = ((3 - co_sum % 3) % 3) as u8;
        state.ep[11] = 66u8.wrapping_sub(ep_sum as u8);
        state.eo[11] = ((2 - eo_sum % 2) % 2) as u8;
        state
    }

    /// Encode to the 54-character facelet string, 9 stickers per face in
    /// URFDLB order.
    pub fn to_facelets(&self) -> String {
        let faces = FACE_ORDER.as_bytes();
        let mut facelets: Vec<u8> = (0..54).map(|i| faces[i / 9]).collect();

        for i in 0..8 {
            let cp = self.cp[i] as usize;
            if cp >= 8 {
                // Corrupt frame; leave the home-face stickers in place.
                continue;
            }
            for p in 0..3 {
                let slot = CORNER_FACELET_MAP[i][(p + self.co[i] as usize) % 3];
                let home = CORNER_FACELET_MAP[cp][p];
                facelets[slot] = faces[home / 9];
            }
        }
        for i in 0..12 {
            let ep = self.ep[i] as usize;
            if ep >= 12 {
                continue;
            }
            for p in 0..2 {
                let slot = EDGE_FACELET_MAP[i][(p + self.eo[i] as usize) % 2];
                let home = EDGE_FACELET_MAP[ep][p];
                facelets[slot] = faces[home / 9];
            }
        }

        // Only ASCII face letters were written above.
        String::from_utf8(facelets).unwrap_or_default()
    }

    pub fn is_solved(&self) -> bool {
        *self == Self::solved()
    }
}

/// A facelet string represents the solved cube iff it equals the canonical
/// constant exactly.
pub fn is_solved_facelets(facelets: &str) -> bool {
    facelets == SOLVED_FACELETS
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_state_encodes_to_canonical_string() {
        let state = CubeState::solved();
        assert_eq!(state.to_facelets(), SOLVED_FACELETS);
        assert!(state.is_solved());
        assert!(is_solved_facelets(&state.to_facelets()));
    }

    #[test]
    fn partial_state_derives_missing_pieces() {
        let state = CubeState::from_partial(
            [0, 1, 2, 3, 4, 5, 6],
            [0; 7],
            [0, 1, 2, 3, 4, 5, 6, 7, 8, 9, 10],
            [0; 11],
        );
        assert_eq!(state, CubeState::solved());

        // Two twisted corners: the derived eighth orientation restores the
        // mod-3 invariant.
        let state = CubeState::from_partial(
            [0, 1, 2, 3, 4, 5, 6],
            [1, 1, 0, 0, 0, 0, 0],
            [0, 1, 2, 3, 4, 5, 6, 7, 8, 9, 10],
            [0; 11],
        );
        assert_eq!(state.co[7], 1);
        assert_eq!(state.co.iter().map(|&o| o as u32).sum::<u32>() % 3, 0);
        assert!(!state.is_solved());
    }

    #[test]
    fn swapped_corners_are_not_solved() {
        let mut state = CubeState::solved();
        state.cp.swap(0, 1);
        assert!(!state.is_solved());
        let facelets = state.to_facelets();
        assert_ne!(facelets, SOLVED_FACELETS);
        assert!(!is_solved_facelets(&facelets));
    }

    #[test]
    fn solved_check_is_exact() {
        assert!(!is_solved_facelets(""));
        let mut off_by_one = SOLVED_FACELETS.to_string();
        off_by_one.replace_range(0..1, "R");
        assert!(!is_solved_facelets(&off_by_one));
    }
}
