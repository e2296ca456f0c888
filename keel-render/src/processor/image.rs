use std::{fs, path::Path};

use keel_asset::{read_artifact, write_artifact, ArtifactProbe, Error};
use keel_graphics as gpu;

use crate::ImageKind;

pub const IMAGE_ARTIFACT_VERSION: u8 = 4;

/// Decoded, mipmapped, possibly block-compressed image, ready for upload.
pub struct ImageData {
    pub format: gpu::TextureFormat,
    pub size: [u32; 2],
    pub levels: Vec<Vec<u8>>,
}

struct CookedImage {
    format: u32,
    size: [u32; 2],
    levels: Vec<Vec<u8>>,
}

keel_asset::flat_struct!(CookedImage {
    format: u32,
    size: [u32; 2],
    levels: Vec<Vec<u8>>,
});

pub(crate) fn encode_format(format: gpu::TextureFormat) -> u32 {
    use gpu::TextureFormat as Tf;
    match format {
        Tf::R8Unorm => 0,
        Tf::Rg8Unorm => 1,
        Tf::Rgba8Unorm => 2,
        Tf::Rgba8UnormSrgb => 3,
        Tf::Rgba16Float => 4,
        Tf::Bc3Unorm => 5,
        Tf::Bc3UnormSrgb => 6,
        Tf::Bc4Unorm => 7,
        Tf::Bc5Unorm => 8,
        _ => unreachable!("unknown TextureFormat variant: {format:?}"),
    }
}

pub(crate) fn decode_format(raw: u32) -> Option<gpu::TextureFormat> {
    use gpu::TextureFormat as Tf;
    Some(match raw {
        0 => Tf::R8Unorm,
        1 => Tf::Rg8Unorm,
        2 => Tf::Rgba8Unorm,
        3 => Tf::Rgba8UnormSrgb,
        4 => Tf::Rgba16Float,
        5 => Tf::Bc3Unorm,
        6 => Tf::Bc3UnormSrgb,
        7 => Tf::Bc4Unorm,
        8 => Tf::Bc5Unorm,
        _ => return None,
    })
}

/// Working-format pixels of mip level 0, before compression.
pub(crate) enum PlainPixels {
    /// 8-bit unorm data with the given channel count.
    U8 {
        channels: usize,
        srgb: bool,
        data: Vec<u8>,
    },
    /// Half-float RGBA, stored as little-endian `f16` pairs.
    F16 { data: Vec<u8> },
}

impl PlainPixels {
    pub(crate) fn uncompressed_format(&self) -> gpu::TextureFormat {
        match *self {
            Self::U8 {
                channels, srgb, ..
            } => match (channels, srgb) {
                (1, false) => gpu::TextureFormat::R8Unorm,
                (2, false) => gpu::TextureFormat::Rg8Unorm,
                (4, false) => gpu::TextureFormat::Rgba8Unorm,
                (4, true) => gpu::TextureFormat::Rgba8UnormSrgb,
                other => unreachable!("unsupported working layout {:?}", other),
            },
            Self::F16 { .. } => gpu::TextureFormat::Rgba16Float,
        }
    }
}

fn srgb_to_linear(x: f32) -> f32 {
    if x <= 0.04045 {
        x / 12.92
    } else {
        ((x + 0.055) / 1.055).powf(2.4)
    }
}

fn linear_to_srgb(x: f32) -> f32 {
    if x <= 0.003_130_8 {
        x * 12.92
    } else {
        1.055 * x.powf(1.0 / 2.4) - 0.055
    }
}

/// Box-downsample one 8-bit level. sRGB content is averaged in linear
/// space; the alpha channel of 4-channel data is always linear.
pub(crate) fn downsample_u8(
    src: &[u8],
    width: u32,
    height: u32,
    channels: usize,
    srgb: bool,
) -> Vec<u8> {
    let dst_width = (width / 2).max(1);
    let dst_height = (height / 2).max(1);
    let mut dst = vec![0u8; (dst_width * dst_height) as usize * channels];
    for y in 0..dst_height {
        for x in 0..dst_width {
            let x0 = (x * 2).min(width - 1);
            let x1 = (x * 2 + 1).min(width - 1);
            let y0 = (y * 2).min(height - 1);
            let y1 = (y * 2 + 1).min(height - 1);
            for c in 0..channels {
                let fetch = |px: u32, py: u32| {
                    src[(py * width + px) as usize * channels + c] as f32 / 255.0
                };
                let gamma = srgb && c < 3;
                let mut sum = 0.0;
                for value in [fetch(x0, y0), fetch(x1, y0), fetch(x0, y1), fetch(x1, y1)] {
                    sum += if gamma { srgb_to_linear(value) } else { value };
                }
                let mut avg = sum / 4.0;
                if gamma {
                    avg = linear_to_srgb(avg);
                }
                dst[(y * dst_width + x) as usize * channels + c] =
                    (avg * 255.0 + 0.5).clamp(0.0, 255.0) as u8;
            }
        }
    }
    dst
}

/// Box-downsample one RGBA16F level. Half floats are linear by definition.
pub(crate) fn downsample_f16(src: &[u8], width: u32, height: u32) -> Vec<u8> {
    let dst_width = (width / 2).max(1);
    let dst_height = (height / 2).max(1);
    let mut dst = vec![0u8; (dst_width * dst_height) as usize * 8];
    for y in 0..dst_height {
        for x in 0..dst_width {
            let x0 = (x * 2).min(width - 1);
            let x1 = (x * 2 + 1).min(width - 1);
            let y0 = (y * 2).min(height - 1);
            let y1 = (y * 2 + 1).min(height - 1);
            for c in 0..4 {
                let fetch = |px: u32, py: u32| {
                    let at = ((py * width + px) as usize * 4 + c) * 2;
                    half::f16::from_le_bytes([src[at], src[at + 1]]).to_f32()
                };
                let avg =
                    (fetch(x0, y0) + fetch(x1, y0) + fetch(x0, y1) + fetch(x1, y1)) / 4.0;
                let at = ((y * dst_width + x) as usize * 4 + c) * 2;
                dst[at..at + 2].copy_from_slice(&half::f16::from_f32(avg).to_le_bytes());
            }
        }
    }
    dst
}

/// Generate the full mip chain down to 1x1, level 0 included.
pub(crate) fn generate_mip_chain(pixels: &PlainPixels, size: [u32; 2]) -> Vec<Vec<u8>> {
    let level_count = gpu::Extent {
        width: size[0],
        height: size[1],
        depth: 1,
    }
    .max_mip_levels();
    let mut levels = Vec::with_capacity(level_count as usize);
    match *pixels {
        PlainPixels::U8 {
            channels,
            srgb,
            ref data,
        } => {
            levels.push(data.clone());
            let (mut width, mut height) = (size[0], size[1]);
            for _ in 1..level_count {
                let next = downsample_u8(levels.last().unwrap(), width, height, channels, srgb);
                width = (width / 2).max(1);
                height = (height / 2).max(1);
                levels.push(next);
            }
        }
        PlainPixels::F16 { ref data } => {
            levels.push(data.clone());
            let (mut width, mut height) = (size[0], size[1]);
            for _ in 1..level_count {
                let next = downsample_f16(levels.last().unwrap(), width, height);
                width = (width / 2).max(1);
                height = (height / 2).max(1);
                levels.push(next);
            }
        }
    }
    levels
}

fn expand_to_rgba(level: &[u8], channels: usize) -> Vec<u8> {
    match channels {
        4 => level.to_vec(),
        2 => level
            .chunks(2)
            .flat_map(|rg| [rg[0], rg[1], 0, 255])
            .collect(),
        1 => level.iter().flat_map(|&r| [r, 0, 0, 255]).collect(),
        other => unreachable!("unsupported channel count {}", other),
    }
}

/// Block-compress a mip chain. Compression applies only while both level
/// dimensions divide evenly by the block extent; the chain is truncated at
/// the first level that does not. A level-0 geometry mismatch disables
/// compression entirely and the caller keeps the plain chain.
pub(crate) fn compress_mip_chain(
    pixels: &PlainPixels,
    size: [u32; 2],
    levels: &[Vec<u8>],
    kind: ImageKind,
) -> Option<(gpu::TextureFormat, Vec<Vec<u8>>)> {
    let (channels, dst_format, bc) = match *pixels {
        PlainPixels::F16 { .. } => return None,
        PlainPixels::U8 { channels, .. } => match kind {
            ImageKind::ColorSrgb | ImageKind::Skybox => (
                channels,
                gpu::TextureFormat::Bc3UnormSrgb,
                texpresso::Format::Bc3,
            ),
            ImageKind::NormalMap => (channels, gpu::TextureFormat::Bc5Unorm, texpresso::Format::Bc5),
            ImageKind::Grayscale => (channels, gpu::TextureFormat::Bc4Unorm, texpresso::Format::Bc4),
        },
    };
    let block = dst_format.block_info().dimensions;
    if size[0] % block.0 as u32 != 0 || size[1] % block.1 as u32 != 0 {
        log::warn!(
            "Image geometry {}x{} is not divisible by the {}x{} block, storing uncompressed",
            size[0],
            size[1],
            block.0,
            block.1
        );
        return None;
    }

    let mut compressed = Vec::new();
    let (mut width, mut height) = (size[0], size[1]);
    for level in levels {
        if width % block.0 as u32 != 0 || height % block.1 as u32 != 0 {
            break;
        }
        let rgba = expand_to_rgba(level, channels);
        let mut out = vec![0u8; bc.compressed_size(width as usize, height as usize)];
        bc.compress(
            &rgba,
            width as usize,
            height as usize,
            texpresso::Params::default(),
            &mut out,
        );
        compressed.push(out);
        width = (width / 2).max(1);
        height = (height / 2).max(1);
    }
    Some((dst_format, compressed))
}

fn convert_rgb_to_rg(input: &[u8]) -> Vec<u8> {
    input
        .chunks(3)
        .flat_map(|rgb| [rgb[0], rgb[1]])
        .collect()
}

pub(crate) fn convert_float_to_half(input: &[f32]) -> Vec<u8> {
    let mut output = Vec::with_capacity(input.len() * 2);
    for &value in input {
        let clamped = value.clamp(-65000.0, 65000.0);
        output.extend_from_slice(&half::f16::from_f32(clamped).to_le_bytes());
    }
    output
}

/// Decode a source image into its working-format pixels for the given kind.
pub(crate) fn decode_source(
    source: &Path,
    kind: ImageKind,
) -> Result<(PlainPixels, [u32; 2]), Error> {
    let bytes = fs::read(source).map_err(|_| Error::SourceNotFound(source.to_path_buf()))?;
    let decoded = image::load_from_memory(&bytes).map_err(|e| Error::SourceUnreadable {
        path: source.to_path_buf(),
        reason: e.to_string(),
    })?;
    let size = [decoded.width(), decoded.height()];
    let pixels = match kind {
        ImageKind::ColorSrgb => PlainPixels::U8 {
            channels: 4,
            srgb: true,
            data: decoded.into_rgba8().into_raw(),
        },
        // the blue channel is reconstructible in the shader, drop it
        ImageKind::NormalMap => PlainPixels::U8 {
            channels: 2,
            srgb: false,
            data: convert_rgb_to_rg(&decoded.into_rgb8().into_raw()),
        },
        ImageKind::Grayscale => PlainPixels::U8 {
            channels: 1,
            srgb: false,
            data: decoded.into_luma8().into_raw(),
        },
        ImageKind::Skybox => {
            let is_float = matches!(
                decoded,
                image::DynamicImage::ImageRgb32F(_) | image::DynamicImage::ImageRgba32F(_)
            );
            if is_float {
                PlainPixels::F16 {
                    data: convert_float_to_half(&decoded.into_rgba32f().into_raw()),
                }
            } else {
                PlainPixels::U8 {
                    channels: 4,
                    srgb: true,
                    data: decoded.into_rgba8().into_raw(),
                }
            }
        }
    };
    Ok((pixels, size))
}

#[profiling::function]
fn process_image(source: &Path, output: &Path, kind: ImageKind) -> Result<ImageData, Error> {
    let (pixels, size) = decode_source(source, kind)?;
    let levels = generate_mip_chain(&pixels, size);

    let (format, levels) = match compress_mip_chain(&pixels, size, &levels, kind) {
        Some((format, compressed)) => (format, compressed),
        None => (pixels.uncompressed_format(), levels),
    };

    let image_data = ImageData {
        format,
        size,
        levels,
    };
    write_artifact(
        output,
        IMAGE_ARTIFACT_VERSION,
        &CookedImage {
            format: encode_format(image_data.format),
            size: image_data.size,
            levels: image_data.levels.clone(),
        },
    )?;
    Ok(image_data)
}

pub fn read_image_data(
    name: &str,
    source: &Path,
    cache_path: &Path,
    kind: ImageKind,
) -> Result<ImageData, Error> {
    match read_artifact::<CookedImage>(cache_path, IMAGE_ARTIFACT_VERSION) {
        ArtifactProbe::Fresh(cooked) => match decode_format(cooked.format) {
            Some(format) => {
                log::info!("Image [{} ({:?})] loaded from cache", name, kind);
                Ok(ImageData {
                    format,
                    size: cooked.size,
                    levels: cooked.levels,
                })
            }
            None => {
                log::warn!(
                    "Could not load image [{} ({:?})] from cache, reprocessing",
                    name,
                    kind
                );
                fs::remove_file(cache_path)?;
                process_image(source, cache_path, kind)
            }
        },
        ArtifactProbe::Stale => {
            log::warn!(
                "Could not load image [{} ({:?})] from cache, reprocessing",
                name,
                kind
            );
            fs::remove_file(cache_path)?;
            process_image(source, cache_path, kind)
        }
        ArtifactProbe::Missing => {
            log::info!("Processing image [{} ({:?})]", name, kind);
            process_image(source, cache_path, kind)
        }
    }
}

#[cfg(test)]
mod tests {
    #[test]
    fn srgb_round_trip() {
        for i in 0..=255u32 {
            let x = i as f32 / 255.0;
            let there_and_back = super::linear_to_srgb(super::srgb_to_linear(x));
            assert!((x - there_and_back).abs() < 1.0e-5);
        }
    }

    #[test]
    fn downsample_averages_in_linear_space() {
        // black and white checker: the sRGB-aware average is much brighter
        // than the naive byte average of 127
        let src = [255u8, 0, 0, 255];
        let linear = super::downsample_u8(&src, 2, 2, 1, false);
        assert_eq!(linear.len(), 1);
        assert!((linear[0] as i32 - 128).abs() <= 1);
        let gamma_aware = super::downsample_u8(&src, 2, 2, 1, true);
        assert!(gamma_aware[0] > 180);
    }

    #[test]
    fn odd_extents_clamp() {
        let src = vec![10u8; 5 * 3];
        let down = super::downsample_u8(&src, 5, 3, 1, false);
        assert_eq!(down.len(), 2);
        assert!(down.iter().all(|&v| v == 10));
    }
}
