//! Block codec drivers: strategy selection and header on encode, header
//! acceptance and per-strategy payload walk on decode.
//!
//! Encoded block layout per strategy (all little-endian):
//!
//! ```text
//! simple   := header(1) base-payload
//! bitmap   := header(2) bitmap[pad8(n)] patches[pad8(x*bx)] base-payload
//! vbyte    := header(1) count(1) base-payload vbyte-highs positions[count]
//! constant := header(1) value[ceil(b/8)]
//! ```
//!
//! The base payload is horizontal for the scalar layout and lane-interleaved
//! for the vertical layouts; bitmap patch values are always packed
//! horizontally. Vertical decode runs the fused unpack + patch + delta1
//! kernel for the simple and bitmap strategies.

use crunchy::unroll;

use crate::bits::{apply_delta1, load_word, mask_bits, pad8, store_word};
use crate::error::{Error, Result};
use crate::header::{self, Header};
use crate::select::{self, BX_CONST, BX_NONE, BX_VBYTE};
use crate::{pack32, vertical};

/// Largest block any layout accepts.
pub(crate) const MAX_BLOCK_LEN: usize = 256;

/// Split `values` into base bits and exceptions. Exceptions are recorded in
/// ascending position order as `(position, value >> b)` pairs.
fn split_exceptions(
    values: &[u32],
    b: u32,
    base: &mut [u32; MAX_BLOCK_LEN],
    high: &mut [u32; MAX_BLOCK_LEN],
    positions: &mut [u8; MAX_BLOCK_LEN],
) -> usize {
    let mask = mask_bits(b);
    let mut count = 0;
    for (i, &v) in values.iter().enumerate() {
        base[i] = v & mask;
        if v > mask {
            positions[count] = i as u8;
            high[count] = v >> b;
            count += 1;
        }
    }
    count
}

fn write_bitmap(out: &mut [u8], positions: &[u8], n: usize) -> usize {
    let mut bitmap = [0u64; 4];
    for &p in positions {
        bitmap[(p >> 6) as usize] |= 1u64 << (p & 63);
    }
    let bytes = pad8(n);
    let mut off = 0;
    for &word in &bitmap {
        if off >= bytes {
            break;
        }
        let len = (bytes - off).min(8);
        store_word(&mut out[off..], word, len);
        off += len;
    }
    bytes
}

/// Read `pad8(n)` bitmap bytes, masking stray bits past `n`, and count the
/// exceptions it flags.
fn read_bitmap(input: &[u8], n: usize) -> ([u64; 4], usize) {
    let bytes = pad8(n);
    let mut bitmap = [0u64; 4];
    let mut off = 0;
    for word in bitmap.iter_mut() {
        if off >= bytes {
            break;
        }
        let len = (bytes - off).min(8);
        *word = load_word(&input[off..off + len]);
        off += len;
    }
    if n % 64 != 0 {
        bitmap[(n - 1) / 64] &= (1u64 << (n % 64)) - 1;
    }
    let count = bitmap.iter().map(|w| w.count_ones() as usize).sum();
    (bitmap, count)
}

/// Merge vbyte-carried high bits back into the base values. Position bytes
/// outside the block are a corrupt encoding.
fn merge_positions(out: &mut [u32], positions: &[u8], high: &[u32], b: u32) -> Result<()> {
    let n = out.len();
    for &p in positions {
        if p as usize >= n {
            return Err(Error::CorruptHeader);
        }
    }
    let count = positions.len();
    let mut i = 0;
    while i + 8 <= count {
        unroll! {
            for j in 0..8 {
                let p = positions[i + j] as usize;
                out[p] |= ((high[i + j] as u64) << b) as u32;
            }
        }
        i += 8;
    }
    while i < count {
        let p = positions[i] as usize;
        out[p] |= ((high[i] as u64) << b) as u32;
        i += 1;
    }
    Ok(())
}

/// The two base-payload shapes a block driver can sit on.
trait BaseKernel {
    /// Values per block, or `None` when the layout takes any `n <= 256`.
    const EXACT_LEN: Option<usize>;

    fn packed_len(n: usize, b: u32) -> usize;
    fn pack(values: &[u32], out: &mut [u8], b: u32) -> usize;
    fn unpack(input: &[u8], out: &mut [u32], b: u32) -> usize;
    /// Fused unpack + optional patch + delta1.
    fn unpack_d1(
        input: &[u8],
        out: &mut [u32],
        b: u32,
        start: u32,
        patch: Option<(&[u64; 4], &[u32])>,
    ) -> usize;
}

/// Horizontal layout: bitstream base payload, three-pass patched decode.
struct Scalar32;

impl BaseKernel for Scalar32 {
    const EXACT_LEN: Option<usize> = None;

    fn packed_len(n: usize, b: u32) -> usize {
        pack32::packed_len(n, b)
    }

    fn pack(values: &[u32], out: &mut [u8], b: u32) -> usize {
        pack32::pack(values, out, b)
    }

    fn unpack(input: &[u8], out: &mut [u32], b: u32) -> usize {
        pack32::unpack(input, out, b)
    }

    fn unpack_d1(
        input: &[u8],
        out: &mut [u32],
        b: u32,
        start: u32,
        patch: Option<(&[u64; 4], &[u32])>,
    ) -> usize {
        match patch {
            None => pack32::unpack_d1(input, out, start, b),
            Some((bitmap, patches)) => {
                let read = pack32::unpack(input, out, b);
                let mut k = 0;
                for (wi, &word) in bitmap.iter().enumerate() {
                    let mut word = word;
                    while word != 0 {
                        let idx = wi * 64 + word.trailing_zeros() as usize;
                        out[idx] |= ((patches[k] as u64) << b) as u32;
                        k += 1;
                        word &= word - 1;
                    }
                }
                apply_delta1(out, start);
                read
            }
        }
    }
}

/// Vertical layout over `L` lanes: fused register-resident patched decode.
struct Lanes<const L: usize>;

impl<const L: usize> BaseKernel for Lanes<L> {
    const EXACT_LEN: Option<usize> = Some(vertical::GROUPS * L);

    fn packed_len(_n: usize, b: u32) -> usize {
        vertical::packed_len(L, b)
    }

    fn pack(values: &[u32], out: &mut [u8], b: u32) -> usize {
        vertical::pack::<L>(values, out, b)
    }

    fn unpack(input: &[u8], out: &mut [u32], b: u32) -> usize {
        vertical::unpack::<L>(input, out, b)
    }

    fn unpack_d1(
        input: &[u8],
        out: &mut [u32],
        b: u32,
        start: u32,
        patch: Option<(&[u64; 4], &[u32])>,
    ) -> usize {
        vertical::unpack_d1::<L>(input, out, b, start, patch)
    }
}

fn encode_block<K: BaseKernel>(values: &[u32], out: &mut [u8]) -> usize {
    let n = values.len();
    match K::EXACT_LEN {
        Some(len) => assert_eq!(n, len, "layout requires exactly {len} values"),
        None => assert!(n >= 1 && n <= MAX_BLOCK_LEN, "block length out of range"),
    }

    let (b, bx) = select::select_bits(values);
    let mut written = header::write(out, b, bx);

    match bx {
        BX_NONE => {
            written += K::pack(values, &mut out[written..], b);
        }
        BX_CONST => {
            let bytes = pad8(b as usize);
            store_word(
                &mut out[written..],
                (values[0] & mask_bits(b)) as u64,
                bytes,
            );
            written += bytes;
        }
        BX_VBYTE => {
            let mut base = [0u32; MAX_BLOCK_LEN];
            let mut high = [0u32; MAX_BLOCK_LEN];
            let mut positions = [0u8; MAX_BLOCK_LEN];
            let count = split_exceptions(values, b, &mut base, &mut high, &mut positions);
            debug_assert!(count < 256);
            out[written] = count as u8;
            written += 1;
            written += K::pack(&base[..n], &mut out[written..], b);
            written += crate::vbyte::encode(&high[..count], &mut out[written..]);
            out[written..written + count].copy_from_slice(&positions[..count]);
            written += count;
        }
        bx => {
            let mut base = [0u32; MAX_BLOCK_LEN];
            let mut high = [0u32; MAX_BLOCK_LEN];
            let mut positions = [0u8; MAX_BLOCK_LEN];
            let count = split_exceptions(values, b, &mut base, &mut high, &mut positions);
            written += write_bitmap(&mut out[written..], &positions[..count], n);
            written += pack32::pack(&high[..count], &mut out[written..], bx);
            written += K::pack(&base[..n], &mut out[written..], b);
        }
    }
    written
}

fn decode_block_d1<K: BaseKernel>(input: &[u8], out: &mut [u32], start: u32) -> Result<usize> {
    let n = out.len();
    match K::EXACT_LEN {
        Some(len) => assert_eq!(n, len, "layout requires exactly {len} values"),
        None => assert!(n >= 1 && n <= MAX_BLOCK_LEN, "block length out of range"),
    }

    let (head, mut read) = header::read(input)?;
    match head {
        Header::Constant { b } => {
            let bytes = pad8(b as usize);
            let data = input.get(read..read + bytes).ok_or(Error::Truncated)?;
            let value = load_word(data) as u32 & mask_bits(b);
            out.fill(value);
            apply_delta1(out, start);
            Ok(read + bytes)
        }
        Header::Simple { b } => {
            let need = K::packed_len(n, b);
            let payload = input.get(read..read + need).ok_or(Error::Truncated)?;
            K::unpack_d1(payload, out, b, start, None);
            Ok(read + need)
        }
        Header::Bitmap { b, bx } => {
            if bx == 0 {
                let need = K::packed_len(n, b);
                let payload = input.get(read..read + need).ok_or(Error::Truncated)?;
                K::unpack_d1(payload, out, b, start, None);
                return Ok(read + need);
            }
            let bmp_bytes = pad8(n);
            let bmp = input.get(read..read + bmp_bytes).ok_or(Error::Truncated)?;
            let (bitmap, count) = read_bitmap(bmp, n);
            read += bmp_bytes;

            let patch_bytes = pack32::packed_len(count, bx);
            let packed = input
                .get(read..read + patch_bytes)
                .ok_or(Error::Truncated)?;
            let mut patches = [0u32; MAX_BLOCK_LEN];
            pack32::unpack(packed, &mut patches[..count], bx);
            read += patch_bytes;

            let need = K::packed_len(n, b);
            let payload = input.get(read..read + need).ok_or(Error::Truncated)?;
            K::unpack_d1(payload, out, b, start, Some((&bitmap, &patches[..count])));
            Ok(read + need)
        }
        Header::Vbyte { b, count } => {
            if count == 0 {
                let need = K::packed_len(n, b);
                let payload = input.get(read..read + need).ok_or(Error::Truncated)?;
                K::unpack_d1(payload, out, b, start, None);
                return Ok(read + need);
            }
            let need = K::packed_len(n, b);
            let payload = input.get(read..read + need).ok_or(Error::Truncated)?;
            K::unpack(payload, out, b);
            read += need;

            let mut high = [0u32; MAX_BLOCK_LEN];
            read += crate::vbyte::decode(&input[read..], count, &mut high)?;
            let positions = input.get(read..read + count).ok_or(Error::Truncated)?;
            merge_positions(out, positions, &high[..count], b)?;
            read += count;

            apply_delta1(out, start);
            Ok(read)
        }
    }
}

pub(crate) fn encode32(values: &[u32], out: &mut [u8]) -> usize {
    encode_block::<Scalar32>(values, out)
}

pub(crate) fn decode32_d1(input: &[u8], out: &mut [u32], start: u32) -> Result<usize> {
    decode_block_d1::<Scalar32>(input, out, start)
}

pub(crate) fn encode128v(values: &[u32], out: &mut [u8]) -> usize {
    encode_block::<Lanes<4>>(values, out)
}

pub(crate) fn decode128v_d1(input: &[u8], out: &mut [u32], start: u32) -> Result<usize> {
    decode_block_d1::<Lanes<4>>(input, out, start)
}

pub(crate) fn encode256v(values: &[u32], out: &mut [u8]) -> usize {
    encode_block::<Lanes<8>>(values, out)
}

pub(crate) fn decode256v_d1(input: &[u8], out: &mut [u32], start: u32) -> Result<usize> {
    decode_block_d1::<Lanes<8>>(input, out, start)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::{naive_bitstream, undelta1};

    #[test]
    fn zero_block_is_one_null_byte() {
        let mut out = [0xFFu8; 32];
        assert_eq!(encode32(&[0, 0, 0, 0], &mut out), 1);
        assert_eq!(out[0], 0x00);

        let mut decoded = [0u32; 4];
        assert_eq!(decode32_d1(&out[..1], &mut decoded, 0), Ok(1));
        assert_eq!(decoded, [1, 2, 3, 4]);
    }

    #[test]
    fn constant_block_bytes() {
        let mut out = [0u8; 32];
        let written = encode32(&[42, 42, 42, 42], &mut out);
        assert_eq!(&out[..written], &[0xC6, 0x2A]);

        let mut decoded = [0u32; 4];
        assert_eq!(decode32_d1(&out[..written], &mut decoded, 0), Ok(2));
        // out[i] = (acc += 42) + i + 1
        assert_eq!(decoded, [43, 86, 129, 172]);
    }

    #[test]
    fn simple_block_bytes() {
        let values = [0u32, 1, 2, 3, 4, 5, 6, 7];
        let mut out = [0u8; 64];
        let written = encode32(&values, &mut out);
        assert_eq!(written, 4);
        assert_eq!(out[0], 0x03);
        assert_eq!(&out[1..4], &naive_bitstream(&values, 3)[..]);

        let mut decoded = [0u32; 8];
        assert_eq!(decode32_d1(&out[..written], &mut decoded, 0), Ok(4));
        assert_eq!(decoded, [1, 3, 6, 10, 15, 21, 28, 36]);
    }

    /// Eight 10-bit outliers in 120 zeros: the cost model prices the vbyte
    /// strategy at 26 bytes against 28 for the bitmap, so the vbyte form is
    /// emitted (the array escape then makes the actual payload larger, but
    /// selection works on the model).
    #[test]
    fn sparse_outliers_pick_vbyte_strategy() {
        let mut values = [0u32; 128];
        for p in (0..128).step_by(16) {
            values[p] = 1000;
        }
        assert_eq!(select::select_bits(&values), (0, BX_VBYTE));

        let mut out = [0u8; 5 * 128 + 16];
        let written = encode32(&values, &mut out);
        // header(1) count(1) no base, escaped vbyte array (1 + 8*4), 8 positions
        assert_eq!(written, 2 + 33 + 8);
        assert_eq!(out[0], 0x40);
        assert_eq!(out[1], 8);

        let mut decoded = [0u32; 128];
        assert_eq!(decode32_d1(&out[..written], &mut decoded, 0), Ok(written));
        assert_eq!(decoded[..], undelta1(&values, 0)[..]);

        // With an empty base payload the vertical encodings are byte-identical.
        let mut vout = [0u8; 5 * 128 + 16];
        let vwritten = encode128v(&values, &mut vout);
        assert_eq!(&vout[..vwritten], &out[..written]);
        let mut vdecoded = [0u32; 128];
        assert_eq!(decode128v_d1(&vout[..vwritten], &mut vdecoded, 0), Ok(vwritten));
        assert_eq!(vdecoded[..], decoded[..]);
    }

    /// Thirty 16-bit outliers over a dense 6-bit base: position bytes make
    /// the vbyte form expensive and the bitmap strategy wins at patch width
    /// 10.
    #[test]
    fn dense_outliers_pick_bitmap_strategy() {
        let mut values = [33u32; 128];
        for p in (0..120).step_by(4) {
            values[p] = 0xFFFF;
        }
        assert_eq!(select::select_bits(&values), (6, 10));

        let mut out = [0u8; 5 * 128 + 16];
        let written = encode32(&values, &mut out);
        // header(2) bitmap(16) patches(pad8(30*10)=38) base(pad8(128*6)=96)
        assert_eq!(written, 2 + 16 + 38 + 96);
        assert_eq!(&out[..2], &[0x80 | 6, 10]);
        let mut expect_bitmap = [0x11u8; 16];
        expect_bitmap[15] = 0;
        assert_eq!(&out[2..18], &expect_bitmap);

        for initial in [0u32, 500] {
            let mut decoded = [0u32; 128];
            assert_eq!(
                decode32_d1(&out[..written], &mut decoded, initial),
                Ok(written)
            );
            assert_eq!(decoded[..], undelta1(&values, initial)[..]);

            // Same strategy through the fused vertical decoder.
            let mut vout = [0u8; 5 * 128 + 16];
            let vwritten = encode128v(&values, &mut vout);
            assert_eq!(vwritten, written);
            assert_eq!(&vout[..18], &out[..18], "header and bitmap must match");
            let mut vdecoded = [0u32; 128];
            assert_eq!(
                decode128v_d1(&vout[..vwritten], &mut vdecoded, initial),
                Ok(vwritten)
            );
            assert_eq!(vdecoded[..], decoded[..]);
        }
    }

    #[test]
    fn bitmap_header_with_zero_patch_width_decodes_as_simple() {
        let values = [5u32, 1, 7, 3, 2, 6, 4, 0];
        let mut simple = [0u8; 16];
        let written = encode32(&values, &mut simple);
        assert_eq!(simple[0], 0x03);

        let mut padded = vec![0x80 | 3, 0x00];
        padded.extend_from_slice(&simple[1..written]);

        let mut a = [0u32; 8];
        let mut b = [0u32; 8];
        assert_eq!(decode32_d1(&simple[..written], &mut a, 9), Ok(written));
        assert_eq!(decode32_d1(&padded, &mut b, 9), Ok(written + 1));
        assert_eq!(a, b);
    }

    #[test]
    fn vbyte_header_with_zero_count_decodes_as_simple() {
        let values = [5u32, 1, 7, 3, 2, 6, 4, 0];
        let mut simple = [0u8; 16];
        let written = encode32(&values, &mut simple);

        let mut relabeled = vec![0x40 | 3, 0x00];
        relabeled.extend_from_slice(&simple[1..written]);

        let mut a = [0u32; 8];
        let mut b = [0u32; 8];
        assert_eq!(decode32_d1(&simple[..written], &mut a, 0), Ok(written));
        assert_eq!(decode32_d1(&relabeled, &mut b, 0), Ok(written + 1));
        assert_eq!(a, b);
    }

    #[test]
    fn out_of_range_position_byte_is_corrupt() {
        // b=0 vbyte block: one exception of value 5 claimed at position 200.
        let bytes = [0x40, 0x01, 0x05, 200];
        let mut out = [0u32; 100];
        assert_eq!(
            decode32_d1(&bytes, &mut out, 0),
            Err(Error::CorruptHeader)
        );
        let mut out = [0u32; 128];
        assert_eq!(
            decode128v_d1(&bytes, &mut out, 0),
            Err(Error::CorruptHeader)
        );
    }

    #[test]
    fn stray_bitmap_pad_bits_are_ignored() {
        // n=12 bitmap block, one real exception at position 2, with garbage
        // bits set past n in the pad byte's upper nibble and the second pad
        // byte. The decoder must mask them off.
        let base = [1u32; 12];
        let mut packed_base = [0u8; 2];
        pack32::pack(&base, &mut packed_base, 1);

        let mut patch = [0u8; 1];
        pack32::pack(&[3], &mut patch, 2);

        let mut bytes = vec![0x80 | 1, 2];
        bytes.push(0b0000_0100); // bitmap byte 0: bit 2 set
        bytes.push(0xF0); // bitmap byte 1: bits 12..15 are past n
        bytes.extend_from_slice(&patch);
        bytes.extend_from_slice(&packed_base);

        let mut out = [0u32; 12];
        let read = decode32_d1(&bytes, &mut out, 0).unwrap();
        assert_eq!(read, bytes.len());

        let mut expect = [1u32; 12];
        expect[2] |= 3 << 1;
        crate::bits::apply_delta1(&mut expect, 0);
        assert_eq!(out, expect);
    }

    #[test]
    fn wide_simple_block_round_trips_at_block_edges() {
        // b=32 exercises the raw-copy paths in every layout.
        let values: Vec<u32> = (0..256u32).map(|i| i.wrapping_mul(0x9E37_79B9)).collect();
        let mut out = vec![0u8; 5 * 256 + 16];
        let written = encode256v(&values, &mut out);
        assert_eq!(written, 1 + 256 * 4);
        assert_eq!(out[0], 32);

        let mut decoded = [0u32; 256];
        assert_eq!(decode256v_d1(&out[..written], &mut decoded, 7), Ok(written));
        assert_eq!(decoded[..], undelta1(&values, 7)[..]);
    }
}
