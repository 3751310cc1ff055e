/*! # P4 block compression for u32 posting-list deltas
This crate implements the P4 (PFor, patched frame-of-reference) block codec
for streams of 32-bit unsigned integers, with the delta-of-one transform used
by inverted-index posting lists. The byte stream is bit-exact with the
established reference format, so blocks written here can be read by other
implementations of the same format and vice versa.

Each block holds up to 256 values. The encoder packs most values at a chosen
base bit width and carries overflowing values as side-channel "patches",
choosing per block among simple bitpacking, bitmap-carried patches,
vbyte-carried patches, and a constant-block form, whichever is smallest under
an exact cost model.

Three wire layouts are provided, each behind the same [`BlockCodec`] trait:

- [`Horizontal`]: values packed contiguously in a little-endian bitstream;
  any block length from 1 to 256.
- [`Vertical128`] / [`Vertical256`]: values interleaved across 4 or 8 lanes
  (fixed block lengths 128 and 256) so that a vectorized decoder reads one
  row of lanes per memory access. Decoding these layouts fuses unpack,
  patching, and the delta1 prefix sum into a single register-resident pass.

Blocks are independent except for the `initial` seed of delta decoding,
which is the previous block's last decoded value (or any caller-chosen
seed at the start of a stream).

## Example

```
use pfor32::{BlockCodec, Horizontal};

// An ascending, duplicate-free posting list.
let docs: Vec<u32> = (0..100u32).map(|i| i * 7 + 3).collect();

let mut encoded = vec![0u8; Horizontal::max_compressed_len(docs.len())];
let len = Horizontal::encode_deltas(0, &docs, &mut encoded);

let mut decoded = vec![0u32; docs.len()];
let read = Horizontal::decode_deltas(0, &encoded[..len], &mut decoded).unwrap();
assert_eq!(read, len);
assert_eq!(docs, decoded);
```

## Chaining fixed-size blocks

```
use pfor32::{BlockCodec, Vertical128};

let docs: Vec<u32> = (1..=256u32).map(|i| i * 3).collect();
let mut encoded = vec![0u8; 2 * Vertical128::max_compressed_len(128)];
let mut decoded = vec![0u32; 256];

// Encode two 128-value blocks; the second seeds from the first's last value.
let mut written = Vertical128::encode_deltas(0, &docs[..128], &mut encoded);
written += Vertical128::encode_deltas(docs[127], &docs[128..], &mut encoded[written..]);

let mut read = Vertical128::decode_deltas(0, &encoded[..written], &mut decoded[..128]).unwrap();
read += Vertical128::decode_deltas(decoded[127], &encoded[read..written], &mut decoded[128..])
    .unwrap();
assert_eq!(read, written);
assert_eq!(docs, decoded);
```
*/

mod bits;
mod block;
mod error;
mod header;
mod pack32;
mod select;
mod vbyte;
mod vertical;

pub use error::{Error, Result};

/// A P4 block codec over one wire layout.
///
/// `encode` consumes values that are already delta1-transformed
/// (`d[i] = x[i] - x[i-1] - 1`); `encode_deltas` applies the transform
/// first. `decode_deltas` always reverses it, yielding the original
/// ascending values. All byte counts returned let the caller chain blocks
/// in a single buffer.
pub trait BlockCodec {
    /// Largest number of values one block may hold. [`Horizontal`] accepts
    /// any length from 1 up to this; the vertical layouts require exactly
    /// this many.
    const BLOCK_LEN: usize;

    /// Encode one block of delta values into `out`. Returns bytes written.
    ///
    /// # Panics
    ///
    /// If `values.len()` is not a length this layout accepts, or `out` is
    /// smaller than [`max_compressed_len`](Self::max_compressed_len).
    fn encode(values: &[u32], out: &mut [u8]) -> usize;

    /// Delta1-transform `values` against `initial` and encode the result.
    /// `values` must be strictly ascending (gaps of at least 1) starting
    /// above `initial`; arithmetic wraps otherwise.
    fn encode_deltas(initial: u32, values: &[u32], out: &mut [u8]) -> usize {
        assert!(values.len() <= Self::BLOCK_LEN);
        let mut deltas = [0u32; 256];
        let mut prev = initial;
        for (d, &v) in deltas.iter_mut().zip(values) {
            *d = v.wrapping_sub(prev).wrapping_sub(1);
            prev = v;
        }
        Self::encode(&deltas[..values.len()], out)
    }

    /// Decode one block, reversing the delta1 transform against `initial`.
    /// Decodes `out.len()` values; returns bytes consumed from `input`.
    ///
    /// Fails with [`Error::CorruptHeader`] on a structurally invalid block
    /// and [`Error::Truncated`] when `input` ends before the block does.
    fn decode_deltas(initial: u32, input: &[u8], out: &mut [u32]) -> Result<usize>;

    /// Output buffer size that is sufficient for any block of `n` values.
    fn max_compressed_len(n: usize) -> usize {
        n * 5 + 16
    }
}

/// Horizontal bitstream layout for blocks of 1 to 256 values.
pub struct Horizontal;

impl BlockCodec for Horizontal {
    const BLOCK_LEN: usize = 256;

    fn encode(values: &[u32], out: &mut [u8]) -> usize {
        block::encode32(values, out)
    }

    fn decode_deltas(initial: u32, input: &[u8], out: &mut [u32]) -> Result<usize> {
        block::decode32_d1(input, out, initial)
    }
}

/// 4-lane interleaved layout for blocks of exactly 128 values.
pub struct Vertical128;

impl BlockCodec for Vertical128 {
    const BLOCK_LEN: usize = 128;

    fn encode(values: &[u32], out: &mut [u8]) -> usize {
        block::encode128v(values, out)
    }

    fn decode_deltas(initial: u32, input: &[u8], out: &mut [u32]) -> Result<usize> {
        block::decode128v_d1(input, out, initial)
    }
}

/// 8-lane interleaved layout for blocks of exactly 256 values.
pub struct Vertical256;

impl BlockCodec for Vertical256 {
    const BLOCK_LEN: usize = 256;

    fn encode(values: &[u32], out: &mut [u8]) -> usize {
        block::encode256v(values, out)
    }

    fn decode_deltas(initial: u32, input: &[u8], out: &mut [u32]) -> Result<usize> {
        block::decode256v_d1(input, out, initial)
    }
}
