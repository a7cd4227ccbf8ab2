//! Capture sample conversion.
//!
//! The codec delivers interleaved multi-channel S32LE. Recorded and buffered
//! audio is mono S16LE: one channel is kept, reduced to its high 16 bits,
//! multiplied by an integer gain and clamped.

use platform::SampleFormat;

/// Downmix interleaved S32LE to mono S16LE, appending to `out`.
///
/// Takes `channel` of each `channels`-wide frame, shifts it right by 16,
/// multiplies by `gain` and clamps to `i16`. A trailing partial frame is
/// ignored. Returns the number of frames converted.
pub fn downmix_s32_to_s16(
    raw: &[u8],
    channels: u16,
    channel: u16,
    gain: i32,
    out: &mut Vec<u8>,
) -> usize {
    convert(raw, SampleFormat::S32Le, channels, channel, gain, out)
}

/// Convert interleaved capture data in `format` to mono S16LE, appending to
/// `out`. Same rules as [`downmix_s32_to_s16`]; S16 input is taken as is
/// before the gain.
pub fn to_mono_s16(
    raw: &[u8],
    format: SampleFormat,
    channels: u16,
    channel: u16,
    gain: i32,
    out: &mut Vec<u8>,
) -> usize {
    convert(raw, format, channels, channel, gain, out)
}

fn convert(
    raw: &[u8],
    format: SampleFormat,
    channels: u16,
    channel: u16,
    gain: i32,
    out: &mut Vec<u8>,
) -> usize {
    let sample_bytes = format.bytes();
    let frame_bytes = usize::from(channels) * sample_bytes;
    if frame_bytes == 0 || channel >= channels {
        return 0;
    }
    let offset = usize::from(channel) * sample_bytes;

    let mut frames = 0;
    out.reserve(raw.len() / frame_bytes * 2);
    for frame in raw.chunks_exact(frame_bytes) {
        let sample = &frame[offset..offset + sample_bytes];
        let high = match format {
            SampleFormat::S16Le => i32::from(i16::from_le_bytes([sample[0], sample[1]])),
            SampleFormat::S32Le => {
                i32::from_le_bytes([sample[0], sample[1], sample[2], sample[3]]) >> 16
            }
        };
        out.extend_from_slice(&clamp_i16(high.saturating_mul(gain)).to_le_bytes());
        frames += 1;
    }
    frames
}

fn clamp_i16(v: i32) -> i16 {
    i16::try_from(v).unwrap_or(if v < 0 { i16::MIN } else { i16::MAX })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn s32_frames(samples: &[[i32; 2]]) -> Vec<u8> {
        samples
            .iter()
            .flat_map(|f| f.iter().flat_map(|s| s.to_le_bytes()))
            .collect()
    }

    fn s16(out: &[u8]) -> Vec<i16> {
        out.chunks_exact(2)
            .map(|b| i16::from_le_bytes([b[0], b[1]]))
            .collect()
    }

    #[test]
    fn takes_high_half_of_selected_channel() {
        let raw = s32_frames(&[[100 << 16, -1], [-(7 << 16), 5 << 16]]);
        let mut out = Vec::new();
        assert_eq!(downmix_s32_to_s16(&raw, 2, 0, 1, &mut out), 2);
        assert_eq!(s16(&out), vec![100, -7]);

        out.clear();
        downmix_s32_to_s16(&raw, 2, 1, 1, &mut out);
        assert_eq!(s16(&out), vec![-1, 5]);
    }

    #[test]
    fn gain_and_clamp() {
        let raw = s32_frames(&[[1000 << 16, 0], [20_000 << 16, 0], [-(20_000 << 16), 0]]);
        let mut out = Vec::new();
        downmix_s32_to_s16(&raw, 2, 0, 4, &mut out);
        assert_eq!(s16(&out), vec![4000, i16::MAX, i16::MIN]);
    }

    #[test]
    fn partial_trailing_frame_is_ignored() {
        let mut raw = s32_frames(&[[1 << 16, 0]]);
        raw.extend_from_slice(&[1, 2, 3]);
        let mut out = Vec::new();
        assert_eq!(downmix_s32_to_s16(&raw, 2, 0, 1, &mut out), 1);
        assert_eq!(out.len(), 2);
    }

    #[test]
    fn channel_out_of_range_converts_nothing() {
        let raw = s32_frames(&[[1, 2]]);
        let mut out = Vec::new();
        assert_eq!(downmix_s32_to_s16(&raw, 2, 2, 1, &mut out), 0);
        assert!(out.is_empty());
    }

    #[test]
    fn s16_mono_passthrough_with_unit_gain() {
        let raw: Vec<u8> = [1i16, -2, 300].iter().flat_map(|s| s.to_le_bytes()).collect();
        let mut out = Vec::new();
        assert_eq!(to_mono_s16(&raw, SampleFormat::S16Le, 1, 0, 1, &mut out), 3);
        assert_eq!(out, raw);
    }

    proptest::proptest! {
        #[test]
        fn output_is_two_bytes_per_whole_frame(
            raw in proptest::collection::vec(proptest::num::u8::ANY, 0..512),
            channels in 1u16..=8,
            gain in 1i32..=16,
        ) {
            let mut out = Vec::new();
            let frames = downmix_s32_to_s16(&raw, channels, 0, gain, &mut out);
            proptest::prop_assert_eq!(frames, raw.len() / (usize::from(channels) * 4));
            proptest::prop_assert_eq!(out.len(), frames * 2);
        }
    }
}
