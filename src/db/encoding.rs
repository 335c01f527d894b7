//! Compact residue alphabet shared by the packer, the scoring table and the
//! kernel.
//!
//! Residues are stored in the NCBI packed matrix order (ARNDCQEGHILKMFPSTWYV
//! BJZX*) so a substitution lookup is a single flat-array index with no
//! per-cell translation step.

/// Size of the residue alphabet (24 amino-acid codes plus stop).
pub const ALPHABET_SIZE: usize = 25;

/// Code for an unknown or ambiguous residue.
pub const UNKNOWN: u8 = 23; // X

/// Code for a translation stop ('*').
pub const STOP: u8 = 24;

pub mod code {
    pub const A: u8 = 0;
    pub const R: u8 = 1;
    pub const N: u8 = 2;
    pub const D: u8 = 3;
    pub const C: u8 = 4;
    pub const Q: u8 = 5;
    pub const E: u8 = 6;
    pub const G: u8 = 7;
    pub const H: u8 = 8;
    pub const I: u8 = 9;
    pub const L: u8 = 10;
    pub const K: u8 = 11;
    pub const M: u8 = 12;
    pub const F: u8 = 13;
    pub const P: u8 = 14;
    pub const S: u8 = 15;
    pub const T: u8 = 16;
    pub const W: u8 = 17;
    pub const Y: u8 = 18;
    pub const V: u8 = 19;
    pub const B: u8 = 20; // Asn or Asp
    pub const J: u8 = 21; // Leu or Ile
    pub const Z: u8 = 22; // Glu or Gln
    pub const X: u8 = 23;
    pub const STOP: u8 = 24;
}

/// Sentinel returned by [`encode_residue`] for bytes that are not amino-acid
/// letters at all (digits, punctuation, non-ASCII).
pub const INVALID: u8 = 0xFF;

/// Map an ASCII residue character (either case) to its alphabet code.
///
/// `U` (selenocysteine) and `O` (pyrrolysine) fold to `X`, matching the
/// treatment standard substitution matrices give them.
#[inline(always)]
pub fn encode_residue(aa: u8) -> u8 {
    const TABLE: [u8; 26] = [
        code::A,    // A
        code::B,    // B
        code::C,    // C
        code::D,    // D
        code::E,    // E
        code::F,    // F
        code::G,    // G
        code::H,    // H
        code::I,    // I
        code::J,    // J
        code::K,    // K
        code::L,    // L
        code::M,    // M
        code::N,    // N
        code::X,    // O -> X
        code::P,    // P
        code::Q,    // Q
        code::R,    // R
        code::S,    // S
        code::T,    // T
        code::X,    // U -> X
        code::V,    // V
        code::W,    // W
        code::X,    // X
        code::Y,    // Y
        code::Z,    // Z
    ];
    match aa {
        b'A'..=b'Z' => TABLE[(aa - b'A') as usize],
        b'a'..=b'z' => TABLE[(aa - b'a') as usize],
        b'*' => code::STOP,
        _ => INVALID,
    }
}

/// Decode an alphabet code back to its canonical ASCII letter.
#[inline(always)]
pub fn decode_residue(code: u8) -> u8 {
    const TABLE: [u8; 25] = *b"ARNDCQEGHILKMFPSTWYVBJZX*";
    if (code as usize) < ALPHABET_SIZE {
        TABLE[code as usize]
    } else {
        b'?'
    }
}
