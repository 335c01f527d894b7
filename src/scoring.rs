//! Substitution scoring table, compiled into the kernel's constant-lookup
//! form.
//!
//! The kernel indexes a flat `ALPHABET_SIZE × ALPHABET_SIZE` array of `i8`
//! with a pair of residue codes; gap handling uses a single extension
//! penalty (no separate open cost). Compilation fails fast on any value
//! outside the signed range the kernel assumes, and on an asymmetric
//! matrix — both are configuration errors, not runtime conditions.

use crate::db::encoding::ALPHABET_SIZE;
use anyhow::{bail, Result};

/// BLOSUM62 in NCBI packed order: ARNDCQEGHILKMFPSTWYVBJZX*
/// Source: NCBI sm_blosum62.c (verbatim values).
pub static BLOSUM62: [i8; ALPHABET_SIZE * ALPHABET_SIZE] = [
    //       A,  R,  N,  D,  C,  Q,  E,  G,  H,  I,  L,  K,  M,  F,  P,  S,  T,  W,  Y,  V,  B,  J,  Z,  X,  *
    /*A*/    4, -1, -2, -2,  0, -1, -1,  0, -2, -1, -1, -1, -1, -2, -1,  1,  0, -3, -2,  0, -2, -1, -1, -1, -4,
    /*R*/   -1,  5,  0, -2, -3,  1,  0, -2,  0, -3, -2,  2, -1, -3, -2, -1, -1, -3, -2, -3, -1, -2,  0, -1, -4,
    /*N*/   -2,  0,  6,  1, -3,  0,  0,  0,  1, -3, -3,  0, -2, -3, -2,  1,  0, -4, -2, -3,  4, -3,  0, -1, -4,
    /*D*/   -2, -2,  1,  6, -3,  0,  2, -1, -1, -3, -4, -1, -3, -3, -1,  0, -1, -4, -3, -3,  4, -3,  1, -1, -4,
    /*C*/    0, -3, -3, -3,  9, -3, -4, -3, -3, -1, -1, -3, -1, -2, -3, -1, -1, -2, -2, -1, -3, -1, -3, -1, -4,
    /*Q*/   -1,  1,  0,  0, -3,  5,  2, -2,  0, -3, -2,  1,  0, -3, -1,  0, -1, -2, -1, -2,  0, -2,  4, -1, -4,
    /*E*/   -1,  0,  0,  2, -4,  2,  5, -2,  0, -3, -3,  1, -2, -3, -1,  0, -1, -3, -2, -2,  1, -3,  4, -1, -4,
    /*G*/    0, -2,  0, -1, -3, -2, -2,  6, -2, -4, -4, -2, -3, -3, -2,  0, -2, -2, -3, -3, -1, -4, -2, -1, -4,
    /*H*/   -2,  0,  1, -1, -3,  0,  0, -2,  8, -3, -3, -1, -2, -1, -2, -1, -2, -2,  2, -3,  0, -3,  0, -1, -4,
    /*I*/   -1, -3, -3, -3, -1, -3, -3, -4, -3,  4,  2, -3,  1,  0, -3, -2, -1, -3, -1,  3, -3,  3, -3, -1, -4,
    /*L*/   -1, -2, -3, -4, -1, -2, -3, -4, -3,  2,  4, -2,  2,  0, -3, -2, -1, -2, -1,  1, -4,  3, -3, -1, -4,
    /*K*/   -1,  2,  0, -1, -3,  1,  1, -2, -1, -3, -2,  5, -1, -3, -1,  0, -1, -3, -2, -2,  0, -3,  1, -1, -4,
    /*M*/   -1, -1, -2, -3, -1,  0, -2, -3, -2,  1,  2, -1,  5,  0, -2, -1, -1, -1, -1,  1, -3,  2, -1, -1, -4,
    /*F*/   -2, -3, -3, -3, -2, -3, -3, -3, -1,  0,  0, -3,  0,  6, -4, -2, -2,  1,  3, -1, -3,  0, -3, -1, -4,
    /*P*/   -1, -2, -2, -1, -3, -1, -1, -2, -2, -3, -3, -1, -2, -4,  7, -1, -1, -4, -3, -2, -2, -3, -1, -1, -4,
    /*S*/    1, -1,  1,  0, -1,  0,  0,  0, -1, -2, -2,  0, -1, -2, -1,  4,  1, -3, -2, -2,  0, -2,  0, -1, -4,
    /*T*/    0, -1,  0, -1, -1, -1, -1, -2, -2, -1, -1, -1, -1, -2, -1,  1,  5, -2, -2,  0, -1, -1, -1, -1, -4,
    /*W*/   -3, -3, -4, -4, -2, -2, -3, -2, -2, -3, -2, -3, -1,  1, -4, -3, -2, 11,  2, -3, -4, -2, -2, -1, -4,
    /*Y*/   -2, -2, -2, -3, -2, -1, -2, -3,  2, -1, -1, -2, -1,  3, -3, -2, -2,  2,  7, -1, -3, -1, -2, -1, -4,
    /*V*/    0, -3, -3, -3, -1, -2, -2, -3, -3,  3,  1, -2,  1, -1, -2, -2,  0, -3, -1,  4, -3,  2, -2, -1, -4,
    /*B*/   -2, -1,  4,  4, -3,  0,  1, -1,  0, -3, -4,  0, -3, -3, -2,  0, -1, -4, -3, -3,  4, -3,  0, -1, -4,
    /*J*/   -1, -2, -3, -3, -1, -2, -3, -4, -3,  3,  3, -3,  2,  0, -3, -2, -1, -2, -1,  2, -3,  3, -3, -1, -4,
    /*Z*/   -1,  0,  0,  1, -3,  4,  4, -2,  0, -3, -3,  1, -1, -3, -1,  0, -1, -2, -2, -2,  0, -3,  4, -1, -4,
    /*X*/   -1, -1, -1, -1, -1, -1, -1, -1, -1, -1, -1, -1, -1, -1, -1, -1, -1, -1, -1, -1, -1, -1, -1, -1, -4,
    /***/   -4, -4, -4, -4, -4, -4, -4, -4, -4, -4, -4, -4, -4, -4, -4, -4, -4, -4, -4, -4, -4, -4, -4, -4,  1,
];

/// Selectable substitution matrix. Additional matrices enter through
/// [`SubstitutionTable::from_values`]; the orchestration layer owns any
/// file-format parsing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SubstitutionMatrix {
    #[default]
    Blosum62,
}

impl SubstitutionMatrix {
    pub fn values(&self) -> &'static [i8; ALPHABET_SIZE * ALPHABET_SIZE] {
        match self {
            SubstitutionMatrix::Blosum62 => &BLOSUM62,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            SubstitutionMatrix::Blosum62 => "BLOSUM62",
        }
    }
}

impl std::str::FromStr for SubstitutionMatrix {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_uppercase().as_str() {
            "BLOSUM62" => Ok(SubstitutionMatrix::Blosum62),
            other => bail!("unknown substitution matrix: {other}"),
        }
    }
}

/// Compiled scoring table: flat substitution lookup plus the gap-extension
/// scalar. Read-only and shared by every dispatch.
#[derive(Debug, Clone)]
pub struct SubstitutionTable {
    scores: Vec<i8>,
    gap_extend: i8,
    max_score: i8,
}

impl SubstitutionTable {
    /// Compile a named matrix. `gap_extend` is the per-column penalty and
    /// must be positive (it is subtracted by the kernel).
    pub fn compile(matrix: SubstitutionMatrix, gap_extend: i32) -> Result<Self> {
        Self::from_values(matrix.values().iter().map(|&v| v as i32), gap_extend)
    }

    /// Compile from raw values in NCBI packed row-major order.
    pub fn from_values<I>(values: I, gap_extend: i32) -> Result<Self>
    where
        I: IntoIterator<Item = i32>,
    {
        let values: Vec<i32> = values.into_iter().collect();
        if values.len() != ALPHABET_SIZE * ALPHABET_SIZE {
            bail!(
                "substitution matrix must have {} entries, got {}",
                ALPHABET_SIZE * ALPHABET_SIZE,
                values.len()
            );
        }
        if !(1..=i8::MAX as i32).contains(&gap_extend) {
            bail!("gap extension penalty {gap_extend} outside kernel range 1..={}", i8::MAX);
        }
        let mut scores = Vec::with_capacity(values.len());
        for (i, &v) in values.iter().enumerate() {
            if v < i8::MIN as i32 || v > i8::MAX as i32 {
                bail!("substitution score {v} at entry {i} outside kernel range");
            }
            scores.push(v as i8);
        }
        for a in 0..ALPHABET_SIZE {
            for b in (a + 1)..ALPHABET_SIZE {
                let ab = scores[a * ALPHABET_SIZE + b];
                let ba = scores[b * ALPHABET_SIZE + a];
                if ab != ba {
                    bail!("substitution matrix asymmetric at ({a},{b}): {ab} != {ba}");
                }
            }
        }
        let max_score = scores.iter().copied().max().unwrap_or(0);
        Ok(SubstitutionTable {
            scores,
            gap_extend: gap_extend as i8,
            max_score,
        })
    }

    /// Substitution score for two residue codes.
    #[inline(always)]
    pub fn score(&self, a: u8, b: u8) -> i32 {
        self.scores[a as usize * ALPHABET_SIZE + b as usize] as i32
    }

    /// Gap-extension penalty (positive; subtract per gap column).
    #[inline(always)]
    pub fn gap_extend(&self) -> i32 {
        self.gap_extend as i32
    }

    /// Largest substitution value; bounds the true score of any pair at
    /// `min(len_a, len_b) * max_score`.
    #[inline]
    pub fn max_score(&self) -> i32 {
        self.max_score as i32
    }

    /// Flat lookup slice in the layout the kernel consumes.
    #[inline]
    pub fn raw(&self) -> &[i8] {
        &self.scores
    }
}
