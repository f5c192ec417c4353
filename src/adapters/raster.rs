use crate::domain::model::BBox;
use crate::utils::error::{EtlError, Result};
use image::{ImageFormat, Luma, Rgb, Rgba};
use ndarray::{Array2, Array3, Axis};
use ndarray_npy::{ReadNpyExt, WriteNpyExt};
use std::io::Cursor;
use tiff::decoder::{Decoder, DecodingResult, Limits};
use tiff::encoder::{colortype, TiffEncoder};
use tiff::tags::Tag;

const MODEL_PIXEL_SCALE: u16 = 33550;
const MODEL_TIEPOINT: u16 = 33922;
const GEO_KEY_DIRECTORY: u16 = 34735;

/// GeoKeyDirectory for geographic WGS84, pixel-is-area:
/// header, GTModelType=2, GTRasterType=1, GeographicType=4326.
const WGS84_GEO_KEYS: [u16; 16] = [1, 1, 0, 3, 1024, 0, 1, 2, 1025, 0, 1, 1, 2048, 0, 1, 4326];

/// Pixels decoded from a GeoTIFF plus the bbox recovered from its tags.
#[derive(Debug, Clone)]
pub struct GeoRaster {
    pub data: Array3<f32>,
    pub bbox: Option<BBox>,
}

fn geo_tags(bbox: &BBox, width: usize, height: usize) -> ([f64; 3], [f64; 6]) {
    let scale = [
        bbox.width_deg() / width as f64,
        bbox.height_deg() / height as f64,
        0.0,
    ];
    let tiepoint = [0.0, 0.0, 0.0, bbox.min_lon, bbox.max_lat, 0.0];
    (scale, tiepoint)
}

/// Single-band float32 GeoTIFF (EPSG:4326).
pub fn encode_geotiff_gray(data: &Array2<f32>, bbox: &BBox) -> Result<Vec<u8>> {
    let (height, width) = data.dim();
    let pixels: Vec<f32> = data.iter().copied().collect();
    encode_geotiff::<colortype::Gray32Float>(&pixels, width, height, bbox)
}

/// Three-band float32 GeoTIFF (EPSG:4326) from a `(rows, cols, 3)` array.
pub fn encode_geotiff_rgb(data: &Array3<f32>, bbox: &BBox) -> Result<Vec<u8>> {
    let (height, width, bands) = data.dim();
    if bands != 3 {
        return Err(EtlError::ProcessingError {
            message: format!("RGB GeoTIFF needs 3 bands, got {}", bands),
        });
    }
    let pixels: Vec<f32> = data.iter().copied().collect();
    encode_geotiff::<colortype::RGB32Float>(&pixels, width, height, bbox)
}

fn encode_geotiff<C>(pixels: &[f32], width: usize, height: usize, bbox: &BBox) -> Result<Vec<u8>>
where
    C: colortype::ColorType<Inner = f32>,
{
    let mut buffer = Cursor::new(Vec::new());
    {
        let mut encoder = TiffEncoder::new(&mut buffer)?;
        let mut image = encoder.new_image::<C>(width as u32, height as u32)?;
        let (scale, tiepoint) = geo_tags(bbox, width, height);
        let dir = image.encoder();
        dir.write_tag(Tag::from_u16_exhaustive(MODEL_PIXEL_SCALE), &scale[..])?;
        dir.write_tag(Tag::from_u16_exhaustive(MODEL_TIEPOINT), &tiepoint[..])?;
        dir.write_tag(Tag::from_u16_exhaustive(GEO_KEY_DIRECTORY), &WGS84_GEO_KEYS[..])?;
        image.write_data(pixels)?;
    }
    Ok(buffer.into_inner())
}

fn decoding_result_to_f32(result: DecodingResult) -> Result<Vec<f32>> {
    Ok(match result {
        DecodingResult::F32(v) => v,
        DecodingResult::F64(v) => v.into_iter().map(|x| x as f32).collect(),
        DecodingResult::U8(v) => v.into_iter().map(f32::from).collect(),
        DecodingResult::U16(v) => v.into_iter().map(f32::from).collect(),
        DecodingResult::U32(v) => v.into_iter().map(|x| x as f32).collect(),
        DecodingResult::U64(v) => v.into_iter().map(|x| x as f32).collect(),
        DecodingResult::I8(v) => v.into_iter().map(f32::from).collect(),
        DecodingResult::I16(v) => v.into_iter().map(f32::from).collect(),
        DecodingResult::I32(v) => v.into_iter().map(|x| x as f32).collect(),
        DecodingResult::I64(v) => v.into_iter().map(|x| x as f32).collect(),
        #[allow(unreachable_patterns)]
        _ => {
            return Err(EtlError::ProcessingError {
                message: "unsupported TIFF sample type".to_string(),
            })
        }
    })
}

/// Decodes any chunky TIFF into `(rows, cols, samples)` float32, reading
/// GeoTIFF placement tags when present.
pub fn decode_geotiff(bytes: &[u8]) -> Result<GeoRaster> {
    let mut decoder = Decoder::new(Cursor::new(bytes))?.with_limits(Limits::unlimited());
    let (width, height) = decoder.dimensions()?;
    let (width, height) = (width as usize, height as usize);

    let scale = decoder
        .get_tag_f64_vec(Tag::from_u16_exhaustive(MODEL_PIXEL_SCALE))
        .ok();
    let tiepoint = decoder
        .get_tag_f64_vec(Tag::from_u16_exhaustive(MODEL_TIEPOINT))
        .ok();

    let pixels = decoding_result_to_f32(decoder.read_image()?)?;
    let plane = width * height;
    if plane == 0 || pixels.len() % plane != 0 {
        return Err(EtlError::ProcessingError {
            message: format!(
                "TIFF holds {} samples, not a multiple of {}x{}",
                pixels.len(),
                width,
                height
            ),
        });
    }
    let samples = pixels.len() / plane;
    let data = Array3::from_shape_vec((height, width, samples), pixels)?;

    let bbox = match (scale, tiepoint) {
        (Some(s), Some(t)) if s.len() >= 2 && t.len() >= 6 => {
            let min_lon = t[3];
            let max_lat = t[4];
            Some(BBox::new(
                min_lon,
                max_lat - s[1] * height as f64,
                min_lon + s[0] * width as f64,
                max_lat,
            ))
        }
        _ => None,
    };

    Ok(GeoRaster { data, bbox })
}

pub fn encode_npy(data: &Array3<f32>) -> Result<Vec<u8>> {
    let mut buffer = Vec::new();
    data.write_npy(&mut buffer)?;
    Ok(buffer)
}

pub fn decode_npy(bytes: &[u8]) -> Result<Array3<f32>> {
    Ok(Array3::<f32>::read_npy(bytes)?)
}

/// Red-yellow-green ramp anchors at NDVI -1, 0 and 1.
const RAMP: [(f32, [f32; 3]); 3] = [
    (-1.0, [165.0, 0.0, 38.0]),
    (0.0, [255.0, 255.0, 191.0]),
    (1.0, [0.0, 104.0, 55.0]),
];

fn ndvi_color(v: f32) -> Rgba<u8> {
    if !v.is_finite() {
        return Rgba([0, 0, 0, 0]);
    }
    let v = v.clamp(-1.0, 1.0);
    let (lo, hi) = if v <= 0.0 { (RAMP[0], RAMP[1]) } else { (RAMP[1], RAMP[2]) };
    let t = (v - lo.0) / (hi.0 - lo.0);
    let mix = |i: usize| (lo.1[i] + (hi.1[i] - lo.1[i]) * t).round() as u8;
    Rgba([mix(0), mix(1), mix(2), 255])
}

fn png_bytes(img: image::DynamicImage) -> Result<Vec<u8>> {
    let mut buffer = Cursor::new(Vec::new());
    img.write_to(&mut buffer, ImageFormat::Png)?;
    Ok(buffer.into_inner())
}

/// NDVI quick-look: ramp over [-1, 1], NaN transparent.
pub fn render_ndvi_png(ndvi: &Array2<f32>) -> Result<Vec<u8>> {
    let (height, width) = ndvi.dim();
    let img = image::RgbaImage::from_fn(width as u32, height as u32, |x, y| {
        ndvi_color(ndvi[[y as usize, x as usize]])
    });
    png_bytes(image::DynamicImage::ImageRgba8(img))
}

/// True-color quick-look from `[0, 1]` reflectances.
pub fn render_rgb_png(rgb: &Array3<f32>) -> Result<Vec<u8>> {
    let (height, width, bands) = rgb.dim();
    if bands < 3 {
        return Err(EtlError::ProcessingError {
            message: format!("RGB quick-look needs 3 bands, got {}", bands),
        });
    }
    let to_u8 = |v: f32| {
        if v.is_finite() {
            (v.clamp(0.0, 1.0) * 255.0).round() as u8
        } else {
            0
        }
    };
    let img = image::RgbImage::from_fn(width as u32, height as u32, |x, y| {
        let (r, c) = (y as usize, x as usize);
        Rgb([to_u8(rgb[[r, c, 0]]), to_u8(rgb[[r, c, 1]]), to_u8(rgb[[r, c, 2]])])
    });
    png_bytes(image::DynamicImage::ImageRgb8(img))
}

/// Cloud mask quick-look: cloud white, clear black.
pub fn render_mask_png(mask: &Array2<bool>) -> Result<Vec<u8>> {
    let (height, width) = mask.dim();
    let img = image::GrayImage::from_fn(width as u32, height as u32, |x, y| {
        Luma([if mask[[y as usize, x as usize]] { 255 } else { 0 }])
    });
    png_bytes(image::DynamicImage::ImageLuma8(img))
}

/// First band of a decoded raster as a 2-D array.
pub fn first_band(raster: &GeoRaster) -> Array2<f32> {
    raster.data.index_axis(Axis(2), 0).to_owned()
}
