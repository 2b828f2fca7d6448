//! Complex float to interleaved signed-byte (CS8) conversion.
//!
//! The HackRF transmit path wants interleaved `i8` I/Q pairs, while upstream
//! code produces `Complex32` in [-1, 1]. Every component is scaled by 127 and
//! truncated toward zero. Values beyond the `i8` range saturate and NaN maps
//! to 0, on every path, so the vector paths are bit-identical to the scalar
//! one for any input.
//!
//! Vector paths work on groups of 8 complex samples (16 floats); the tail of a
//! block that is not a whole number of groups goes through the scalar loop.

use num_complex::Complex32;
use std::sync::OnceLock;

/// Complex samples per vector group.
pub const GROUP_SAMPLES: usize = 8;

/// Full-scale multiplier for the I and Q components.
pub const SCALE: f32 = 127.0;

const GROUP_FLOATS: usize = GROUP_SAMPLES * 2;

/// Conversion strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConverterKind {
    /// Plain loop, always available
    Scalar,
    /// 128-bit SSE2, four 4-float loads per group
    Sse2,
    /// 256-bit AVX, two 8-float loads per group
    Avx,
    /// 128-bit NEON on aarch64
    Neon,
}

static DETECTED: OnceLock<ConverterKind> = OnceLock::new();

impl ConverterKind {
    pub const ALL: [ConverterKind; 4] = [
        ConverterKind::Scalar,
        ConverterKind::Sse2,
        ConverterKind::Avx,
        ConverterKind::Neon,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            ConverterKind::Scalar => "scalar",
            ConverterKind::Sse2 => "SSE2 (128-bit)",
            ConverterKind::Avx => "AVX (256-bit)",
            ConverterKind::Neon => "NEON (128-bit)",
        }
    }

    /// Whether the running CPU can execute this strategy.
    pub fn is_supported(self) -> bool {
        match self {
            ConverterKind::Scalar => true,
            #[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
            ConverterKind::Sse2 => is_x86_feature_detected!("sse2"),
            #[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
            ConverterKind::Avx => is_x86_feature_detected!("avx"),
            #[cfg(target_arch = "aarch64")]
            ConverterKind::Neon => std::arch::is_aarch64_feature_detected!("neon"),
            _ => false,
        }
    }

    /// Best strategy for this CPU. Detected once and cached.
    pub fn detect() -> Self {
        *DETECTED.get_or_init(|| {
            let kind = [ConverterKind::Avx, ConverterKind::Sse2, ConverterKind::Neon]
                .into_iter()
                .find(|k| k.is_supported())
                .unwrap_or(ConverterKind::Scalar);
            log::debug!("sample converter: {}", kind.name());
            kind
        })
    }

    /// Every strategy the running CPU supports, scalar first.
    pub fn available() -> Vec<ConverterKind> {
        Self::ALL.into_iter().filter(|k| k.is_supported()).collect()
    }
}

/// Float to CS8 converter bound to one strategy.
///
/// Stateless and `Copy`; one instance can be shared by any number of threads
/// working on disjoint buffers.
#[derive(Debug, Clone, Copy)]
pub struct Converter {
    kind: ConverterKind,
}

impl Default for Converter {
    fn default() -> Self {
        Self::detect()
    }
}

impl Converter {
    /// Use the fastest strategy the CPU supports.
    pub fn detect() -> Self {
        Self {
            kind: ConverterKind::detect(),
        }
    }

    pub fn scalar() -> Self {
        Self {
            kind: ConverterKind::Scalar,
        }
    }

    /// Force a strategy. Falls back to scalar if the CPU lacks it.
    pub fn with_kind(kind: ConverterKind) -> Self {
        if kind.is_supported() {
            Self { kind }
        } else {
            log::warn!("{} not supported on this CPU, using scalar", kind.name());
            Self::scalar()
        }
    }

    pub fn kind(&self) -> ConverterKind {
        self.kind
    }

    /// Convert `input` into interleaved I/Q bytes.
    ///
    /// `output[2i]` is the scaled real part of `input[i]`, `output[2i + 1]` the
    /// scaled imaginary part.
    ///
    /// # Panics
    ///
    /// If `output.len() != 2 * input.len()`.
    pub fn convert(&self, input: &[Complex32], output: &mut [i8]) {
        assert_eq!(
            output.len(),
            input.len() * 2,
            "output must hold two bytes per complex sample"
        );

        let floats = as_floats(input);
        let split = (input.len() / GROUP_SAMPLES) * GROUP_FLOATS;
        let (head_in, tail_in) = floats.split_at(split);
        let (head_out, tail_out) = output.split_at_mut(split);

        // SAFETY: `kind` is only ever a strategy that passed `is_supported`,
        // and `head_in` is a whole number of groups with a matching output.
        match self.kind {
            #[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
            ConverterKind::Sse2 => unsafe { x86::convert_sse2(head_in, head_out) },
            #[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
            ConverterKind::Avx => unsafe { x86::convert_avx(head_in, head_out) },
            #[cfg(target_arch = "aarch64")]
            ConverterKind::Neon => unsafe { neon::convert_neon(head_in, head_out) },
            _ => convert_scalar(head_in, head_out),
        }

        convert_scalar(tail_in, tail_out);
    }
}

/// Scalar conversion of interleaved floats, one byte per float.
///
/// `as i8` truncates toward zero, saturates, and maps NaN to 0.
#[inline(never)]
pub fn convert_scalar(input: &[f32], output: &mut [i8]) {
    for (out, &x) in output.iter_mut().zip(input) {
        *out = (x * SCALE) as i8;
    }
}

fn as_floats(input: &[Complex32]) -> &[f32] {
    // SAFETY: Complex<f32> is #[repr(C)] { re, im }, so a slice of n complex
    // values is exactly 2n contiguous f32 with the same alignment.
    unsafe { std::slice::from_raw_parts(input.as_ptr() as *const f32, input.len() * 2) }
}

#[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
mod x86 {
    #[cfg(target_arch = "x86")]
    use std::arch::x86::*;
    #[cfg(target_arch = "x86_64")]
    use std::arch::x86_64::*;

    use super::{GROUP_FLOATS, SCALE};

    #[target_feature(enable = "sse2")]
    #[inline]
    unsafe fn quantize_sse2(v: __m128, scale: __m128, lo: __m128, hi: __m128) -> __m128i {
        let x = _mm_mul_ps(v, scale);
        // NaN lanes -> 0
        let x = _mm_and_ps(x, _mm_cmpord_ps(x, x));
        let x = _mm_min_ps(_mm_max_ps(x, lo), hi);
        _mm_cvttps_epi32(x)
    }

    /// `input.len()` must be a multiple of 16 and equal `output.len()`.
    #[target_feature(enable = "sse2")]
    pub unsafe fn convert_sse2(input: &[f32], output: &mut [i8]) {
        let scale = _mm_set1_ps(SCALE);
        let lo = _mm_set1_ps(i8::MIN as f32);
        let hi = _mm_set1_ps(i8::MAX as f32);

        for (src, dst) in input
            .chunks_exact(GROUP_FLOATS)
            .zip(output.chunks_exact_mut(GROUP_FLOATS))
        {
            let p = src.as_ptr();
            let a = quantize_sse2(_mm_loadu_ps(p), scale, lo, hi);
            let b = quantize_sse2(_mm_loadu_ps(p.add(4)), scale, lo, hi);
            let c = quantize_sse2(_mm_loadu_ps(p.add(8)), scale, lo, hi);
            let d = quantize_sse2(_mm_loadu_ps(p.add(12)), scale, lo, hi);

            let shorts_ab = _mm_packs_epi32(a, b);
            let shorts_cd = _mm_packs_epi32(c, d);
            let bytes = _mm_packs_epi16(shorts_ab, shorts_cd);

            _mm_storeu_si128(dst.as_mut_ptr() as *mut __m128i, bytes);
        }
    }

    #[target_feature(enable = "avx")]
    #[inline]
    unsafe fn quantize_avx(v: __m256, scale: __m256, lo: __m256, hi: __m256) -> __m256i {
        let x = _mm256_mul_ps(v, scale);
        let x = _mm256_and_ps(x, _mm256_cmp_ps::<_CMP_ORD_Q>(x, x));
        let x = _mm256_min_ps(_mm256_max_ps(x, lo), hi);
        _mm256_cvttps_epi32(x)
    }

    /// `input.len()` must be a multiple of 16 and equal `output.len()`.
    #[target_feature(enable = "avx")]
    pub unsafe fn convert_avx(input: &[f32], output: &mut [i8]) {
        let scale = _mm256_set1_ps(SCALE);
        let lo = _mm256_set1_ps(i8::MIN as f32);
        let hi = _mm256_set1_ps(i8::MAX as f32);

        for (src, dst) in input
            .chunks_exact(GROUP_FLOATS)
            .zip(output.chunks_exact_mut(GROUP_FLOATS))
        {
            let p = src.as_ptr();
            let first = quantize_avx(_mm256_loadu_ps(p), scale, lo, hi);
            let second = quantize_avx(_mm256_loadu_ps(p.add(8)), scale, lo, hi);

            // AVX1 has no 256-bit integer pack; narrow each 128-bit half.
            let shorts_first = _mm_packs_epi32(
                _mm256_castsi256_si128(first),
                _mm256_extractf128_si256::<1>(first),
            );
            let shorts_second = _mm_packs_epi32(
                _mm256_castsi256_si128(second),
                _mm256_extractf128_si256::<1>(second),
            );
            let bytes = _mm_packs_epi16(shorts_first, shorts_second);

            _mm_storeu_si128(dst.as_mut_ptr() as *mut __m128i, bytes);
        }
    }
}

#[cfg(target_arch = "aarch64")]
mod neon {
    use std::arch::aarch64::*;

    use super::{GROUP_FLOATS, SCALE};

    /// `input.len()` must be a multiple of 16 and equal `output.len()`.
    ///
    /// FCVTZS already truncates, saturates and zeroes NaN; the narrowing
    /// moves saturate the rest of the way down to i8.
    #[target_feature(enable = "neon")]
    pub unsafe fn convert_neon(input: &[f32], output: &mut [i8]) {
        let scale = vdupq_n_f32(SCALE);

        for (src, dst) in input
            .chunks_exact(GROUP_FLOATS)
            .zip(output.chunks_exact_mut(GROUP_FLOATS))
        {
            let p = src.as_ptr();
            let a = vcvtq_s32_f32(vmulq_f32(vld1q_f32(p), scale));
            let b = vcvtq_s32_f32(vmulq_f32(vld1q_f32(p.add(4)), scale));
            let c = vcvtq_s32_f32(vmulq_f32(vld1q_f32(p.add(8)), scale));
            let d = vcvtq_s32_f32(vmulq_f32(vld1q_f32(p.add(12)), scale));

            let shorts_ab = vcombine_s16(vqmovn_s32(a), vqmovn_s32(b));
            let shorts_cd = vcombine_s16(vqmovn_s32(c), vqmovn_s32(d));
            let bytes = vcombine_s8(vqmovn_s16(shorts_ab), vqmovn_s16(shorts_cd));

            vst1q_s8(dst.as_mut_ptr(), bytes);
        }
    }
}
