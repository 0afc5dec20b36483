/// Convert a stereo float pair to interleaved 16-bit samples
///
/// Samples are scaled by 32767 and hard-clipped to the i16 range. Writes
/// `out.len() / 2` frames; both channels must be at least that long.
pub fn mixdown(left: &[f32], right: &[f32], out: &mut [i16]) {
    for ((frame, &l), &r) in out.chunks_exact_mut(2).zip(left).zip(right) {
        frame[0] = to_i16(l);
        frame[1] = to_i16(r);
    }
}

#[inline]
fn to_i16(sample: f32) -> i16 {
    (sample * 32767.0).clamp(-32768.0, 32767.0) as i16
}
