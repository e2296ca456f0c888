use std::{fs, path::Path};

use keel_asset::{read_artifact, write_artifact, ArtifactProbe, Error};
use keel_graphics as gpu;

use super::image::{
    compress_mip_chain, decode_format, decode_source, encode_format, generate_mip_chain,
    PlainPixels,
};
use crate::ImageKind;

pub const SKYBOX_ARTIFACT_VERSION: u8 = 1;

/// Six cubemap faces with full mip chains, projected from one
/// equirectangular panorama.
pub struct SkyboxData {
    pub format: gpu::TextureFormat,
    pub face_size: u32,
    /// `faces[face][level]`, faces ordered +X, -X, +Y, -Y, +Z, -Z.
    pub faces: Vec<Vec<Vec<u8>>>,
}

struct CookedSkybox {
    format: u32,
    face_size: u32,
    faces: Vec<Vec<Vec<u8>>>,
}

keel_asset::flat_struct!(CookedSkybox {
    format: u32,
    face_size: u32,
    faces: Vec<Vec<Vec<u8>>>,
});

/// Direction through the center of texel `(u, v)` (both in -1..1) of a
/// cubemap face, following the +X,-X,+Y,-Y,+Z,-Z layer order.
fn face_direction(face: usize, u: f32, v: f32) -> glam::Vec3 {
    match face {
        0 => glam::Vec3::new(1.0, -v, -u),
        1 => glam::Vec3::new(-1.0, -v, u),
        2 => glam::Vec3::new(u, 1.0, v),
        3 => glam::Vec3::new(u, -1.0, -v),
        4 => glam::Vec3::new(u, -v, 1.0),
        5 => glam::Vec3::new(-u, -v, -1.0),
        _ => unreachable!(),
    }
    .normalize()
}

trait Texels {
    const CHANNELS: usize;
    const BYTES_PER_CHANNEL: usize;
    fn fetch(data: &[u8], at: usize) -> f32;
    fn store(data: &mut [u8], at: usize, value: f32);
}

struct U8Texels;
impl Texels for U8Texels {
    const CHANNELS: usize = 4;
    const BYTES_PER_CHANNEL: usize = 1;
    fn fetch(data: &[u8], at: usize) -> f32 {
        data[at] as f32 / 255.0
    }
    fn store(data: &mut [u8], at: usize, value: f32) {
        data[at] = (value * 255.0 + 0.5).clamp(0.0, 255.0) as u8;
    }
}

struct F16Texels;
impl Texels for F16Texels {
    const CHANNELS: usize = 4;
    const BYTES_PER_CHANNEL: usize = 2;
    fn fetch(data: &[u8], at: usize) -> f32 {
        half::f16::from_le_bytes([data[at * 2], data[at * 2 + 1]]).to_f32()
    }
    fn store(data: &mut [u8], at: usize, value: f32) {
        data[at * 2..at * 2 + 2].copy_from_slice(&half::f16::from_f32(value).to_le_bytes());
    }
}

/// Bilinear lat-long sample of the panorama along `dir`, wrapping
/// horizontally and clamping at the poles.
fn sample_equirectangular<T: Texels>(
    data: &[u8],
    width: u32,
    height: u32,
    dir: glam::Vec3,
    texel: &mut [f32],
) {
    use std::f32::consts::PI;
    let phi = dir.z.atan2(dir.x);
    let theta = dir.y.asin();
    let x = (phi / (2.0 * PI) + 0.5) * width as f32 - 0.5;
    let y = (0.5 - theta / PI) * height as f32 - 0.5;

    let x0 = x.floor();
    let y0 = y.floor();
    let fx = x - x0;
    let fy = y - y0;
    let wrap_x = |ix: i32| ix.rem_euclid(width as i32) as u32;
    let clamp_y = |iy: i32| iy.clamp(0, height as i32 - 1) as u32;
    let corners = [
        (wrap_x(x0 as i32), clamp_y(y0 as i32), (1.0 - fx) * (1.0 - fy)),
        (wrap_x(x0 as i32 + 1), clamp_y(y0 as i32), fx * (1.0 - fy)),
        (wrap_x(x0 as i32), clamp_y(y0 as i32 + 1), (1.0 - fx) * fy),
        (wrap_x(x0 as i32 + 1), clamp_y(y0 as i32 + 1), fx * fy),
    ];

    for value in texel.iter_mut() {
        *value = 0.0;
    }
    for &(px, py, weight) in corners.iter() {
        let base = (py * width + px) as usize * T::CHANNELS;
        for (c, value) in texel.iter_mut().enumerate() {
            *value += weight * T::fetch(data, base + c);
        }
    }
}

fn project_face<T: Texels>(
    data: &[u8],
    width: u32,
    height: u32,
    face: usize,
    face_size: u32,
) -> Vec<u8> {
    let bytes_per_texel = T::CHANNELS * T::BYTES_PER_CHANNEL;
    let mut out = vec![0u8; (face_size * face_size) as usize * bytes_per_texel];
    let mut texel = [0.0f32; 4];
    for y in 0..face_size {
        for x in 0..face_size {
            let u = (x as f32 + 0.5) / face_size as f32 * 2.0 - 1.0;
            let v = (y as f32 + 0.5) / face_size as f32 * 2.0 - 1.0;
            let dir = face_direction(face, u, v);
            sample_equirectangular::<T>(data, width, height, dir, &mut texel);
            let base = (y * face_size + x) as usize * T::CHANNELS;
            for (c, &value) in texel.iter().enumerate() {
                T::store(&mut out, base + c, value);
            }
        }
    }
    out
}

#[profiling::function]
fn process_skybox(source: &Path, output: &Path) -> Result<SkyboxData, Error> {
    let (pixels, size) = decode_source(source, ImageKind::Skybox)?;
    let face_size = (size[1] / 2).max(1);

    let mut format = pixels.uncompressed_format();
    let mut faces = Vec::with_capacity(6);
    for face in 0..6 {
        let (face_pixels, face_levels) = match pixels {
            PlainPixels::U8 {
                channels,
                srgb,
                ref data,
            } => {
                let projected = project_face::<U8Texels>(data, size[0], size[1], face, face_size);
                let plain = PlainPixels::U8 {
                    channels,
                    srgb,
                    data: projected,
                };
                let levels = generate_mip_chain(&plain, [face_size, face_size]);
                (plain, levels)
            }
            PlainPixels::F16 { ref data } => {
                let projected = project_face::<F16Texels>(data, size[0], size[1], face, face_size);
                let plain = PlainPixels::F16 { data: projected };
                let levels = generate_mip_chain(&plain, [face_size, face_size]);
                (plain, levels)
            }
        };
        match compress_mip_chain(
            &face_pixels,
            [face_size, face_size],
            &face_levels,
            ImageKind::Skybox,
        ) {
            Some((compressed_format, compressed)) => {
                format = compressed_format;
                faces.push(compressed);
            }
            None => faces.push(face_levels),
        }
    }

    // every face must carry the same level count for a valid cubemap
    let level_count = faces.iter().map(Vec::len).min().unwrap();
    for face in faces.iter_mut() {
        face.truncate(level_count);
    }

    let skybox_data = SkyboxData {
        format,
        face_size,
        faces,
    };
    write_artifact(
        output,
        SKYBOX_ARTIFACT_VERSION,
        &CookedSkybox {
            format: encode_format(skybox_data.format),
            face_size: skybox_data.face_size,
            faces: skybox_data.faces.clone(),
        },
    )?;
    Ok(skybox_data)
}

pub fn read_skybox_data(name: &str, source: &Path, cache_path: &Path) -> Result<SkyboxData, Error> {
    match read_artifact::<CookedSkybox>(cache_path, SKYBOX_ARTIFACT_VERSION) {
        ArtifactProbe::Fresh(cooked) => {
            match decode_format(cooked.format) {
                Some(format) if cooked.faces.len() == 6 => {
                    log::info!("Equirectangular skybox [{}] loaded from cache", name);
                    return Ok(SkyboxData {
                        format,
                        face_size: cooked.face_size,
                        faces: cooked.faces,
                    });
                }
                _ => {}
            }
            log::warn!(
                "Could not load equirectangular skybox [{}] from cache, reprocessing",
                name
            );
            fs::remove_file(cache_path)?;
            process_skybox(source, cache_path)
        }
        ArtifactProbe::Stale => {
            log::warn!(
                "Could not load equirectangular skybox [{}] from cache, reprocessing",
                name
            );
            fs::remove_file(cache_path)?;
            process_skybox(source, cache_path)
        }
        ArtifactProbe::Missing => {
            log::info!("Processing equirectangular skybox [{}]", name);
            process_skybox(source, cache_path)
        }
    }
}

#[cfg(test)]
mod tests {
    #[test]
    fn face_directions_are_distinct_axes() {
        for face in 0..6 {
            let center = super::face_direction(face, 0.0, 0.0);
            let expected = match face {
                0 => glam::Vec3::X,
                1 => -glam::Vec3::X,
                2 => glam::Vec3::Y,
                3 => -glam::Vec3::Y,
                4 => glam::Vec3::Z,
                _ => -glam::Vec3::Z,
            };
            assert!((center - expected).length() < 1.0e-6);
        }
    }

    #[test]
    fn equirect_sampling_hits_expected_rows() {
        // 4x2 grayscale-as-rgba panorama: top row bright, bottom row dark
        let mut data = Vec::new();
        for value in [250u8, 250, 250, 250, 10, 10, 10, 10] {
            data.extend_from_slice(&[value, value, value, 255]);
        }
        let mut texel = [0.0f32; 4];
        // straight up lands in the top row
        super::sample_equirectangular::<super::U8Texels>(
            &data,
            4,
            2,
            glam::Vec3::Y,
            &mut texel,
        );
        assert!(texel[0] > 0.9);
        // straight down lands in the bottom row
        super::sample_equirectangular::<super::U8Texels>(
            &data,
            4,
            2,
            -glam::Vec3::Y,
            &mut texel,
        );
        assert!(texel[0] < 0.1);
    }
}
