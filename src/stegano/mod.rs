//! LSB steganography over carrier images.
//!
//! Layout: a 32-bit little-endian length followed by the payload, one bit per
//! colour channel. Pixels are visited row-major, channels in R, G, B order
//! (alpha is never touched), and each byte is written least significant bit
//! first. The payload is stored as-is; callers hand in finished containers.

use std::fs;
use std::io::{BufWriter, Cursor, Write};
use std::path::Path;

use image::{DynamicImage, ImageFormat, RgbaImage};
use rayon::prelude::*;

use crate::archive;
use crate::fsx::AtomicFile;
use crate::{ArchiverError, Result};

const PREFIX_BYTES: usize = 4;
const PREFIX_BITS: u64 = 32;
const CHANNELS_USED: u64 = 3;
/// 8 pixels hold 24 bits, i.e. exactly 3 stream bytes.
const PIXELS_PER_CHUNK: usize = 8;
const BYTES_PER_CHUNK: usize = 3;

/// Payload bytes an image of `width` x `height` can carry after the length prefix.
pub fn capacity(width: u32, height: u32) -> u64 {
    let slots = width as u64 * height as u64 * CHANNELS_USED;
    slots.saturating_sub(PREFIX_BITS) / 8
}

/// Embed `payload` in a copy of `carrier`.
///
/// The result keeps an alpha channel only if the carrier had one.
pub fn hide(carrier: &DynamicImage, payload: &[u8]) -> Result<DynamicImage> {
    let mut rgba = carrier.to_rgba8();
    let available = capacity(rgba.width(), rgba.height());
    let needed = payload.len() as u64;
    if needed > available || needed > u32::MAX as u64 {
        return Err(ArchiverError::Capacity { needed, available });
    }

    let mut stream = Vec::with_capacity(PREFIX_BYTES + payload.len());
    stream.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    stream.extend_from_slice(payload);

    let raw: &mut [u8] = &mut rgba;
    raw.par_chunks_mut(PIXELS_PER_CHUNK * 4)
        .zip(stream.par_chunks(BYTES_PER_CHUNK))
        .for_each(|(pixels, bytes)| {
            for (j, byte) in bytes.iter().enumerate() {
                for bit in 0..8 {
                    let slot = j * 8 + bit;
                    let at = (slot / 3) * 4 + slot % 3;
                    pixels[at] = (pixels[at] & !1) | ((byte >> bit) & 1);
                }
            }
        });

    let stego = DynamicImage::ImageRgba8(rgba);
    if carrier.color().has_alpha() {
        Ok(stego)
    } else {
        Ok(DynamicImage::ImageRgb8(stego.to_rgb8()))
    }
}

/// Read the payload back out of `image`.
///
/// Fails with [`ArchiverError::InvalidStegoPayload`] when the declared length
/// exceeds what the image could hold, which is what a non-stego image usually
/// produces.
pub fn extract(image: &DynamicImage) -> Result<Vec<u8>> {
    let rgba = image.to_rgba8();
    let cap = capacity(rgba.width(), rgba.height());
    let slots = rgba.width() as u64 * rgba.height() as u64 * CHANNELS_USED;
    if slots < PREFIX_BITS {
        return Err(ArchiverError::Image("image is too small to carry a payload".into()));
    }

    let mut prefix = [0u8; PREFIX_BYTES];
    for (i, b) in prefix.iter_mut().enumerate() {
        *b = read_byte(&rgba, i);
    }
    let declared = u32::from_le_bytes(prefix) as u64;
    if declared > cap {
        return Err(ArchiverError::InvalidStegoPayload { declared, capacity: cap });
    }

    let payload = (PREFIX_BYTES..PREFIX_BYTES + declared as usize)
        .into_par_iter()
        .map(|i| read_byte(&rgba, i))
        .collect();
    Ok(payload)
}

fn read_byte(rgba: &RgbaImage, index: usize) -> u8 {
    let raw: &[u8] = rgba;
    let mut v = 0u8;
    for bit in 0..8 {
        let slot = index * 8 + bit;
        v |= (raw[(slot / 3) * 4 + slot % 3] & 1) << bit;
    }
    v
}

/// Image format for `path`, which must be one that preserves every pixel bit.
pub fn lossless_format(path: &Path) -> Result<ImageFormat> {
    match ImageFormat::from_path(path) {
        Ok(f @ (ImageFormat::Png | ImageFormat::Bmp | ImageFormat::Tiff)) => Ok(f),
        _ => Err(ArchiverError::Validation(format!(
            "'{}' must be a PNG, BMP or TIFF file; other formats would destroy the hidden data",
            path.display()
        ))),
    }
}

fn open_image(path: &Path) -> Result<DynamicImage> {
    image::open(path).map_err(|e| ArchiverError::from(e).at(path))
}

/// Hide raw `payload` bytes in the image at `carrier_path`, writing the result to `output_path`.
pub fn hide_payload_in_image(payload: &[u8], carrier_path: &Path, output_path: &Path) -> Result<()> {
    let format = lossless_format(output_path)?;
    let carrier = open_image(carrier_path)?;
    let stego = hide(&carrier, payload)?;

    let target = AtomicFile::create(output_path)?;
    {
        let mut out = BufWriter::new(target.file());
        stego.write_to(&mut out, format).map_err(|e| ArchiverError::from(e).at(output_path))?;
        out.flush().map_err(|e| ArchiverError::io(e, output_path))?;
    }
    target.persist()?;
    tracing::info!(
        carrier = %carrier_path.display(),
        output = %output_path.display(),
        bytes = payload.len(),
        capacity = capacity(carrier.width(), carrier.height()),
        "payload hidden"
    );
    Ok(())
}

/// Hide the container at `archive_path` in the image at `image_path`.
pub fn hide_in_image(archive_path: &Path, image_path: &Path, output_path: &Path) -> Result<()> {
    lossless_format(output_path)?;
    let container = fs::read(archive_path).map_err(|e| ArchiverError::io(e, archive_path))?;
    archive::read_summary(&mut Cursor::new(&container)).map_err(|e| e.at(archive_path))?;
    hide_payload_in_image(&container, image_path, output_path)
}

/// Recover a hidden container from `image_path` into `output_path`.
///
/// The output is written only if the payload parses as a container; decompress
/// it afterwards to get the original file back.
pub fn extract_from_image(image_path: &Path, output_path: &Path) -> Result<()> {
    let image = open_image(image_path)?;
    let payload = extract(&image)?;
    archive::read_summary(&mut Cursor::new(&payload))?;

    let mut target = AtomicFile::create(output_path)?;
    target
        .file_mut()
        .write_all(&payload)
        .map_err(|e| ArchiverError::io(e, output_path))?;
    target.persist()?;
    tracing::info!(image = %image_path.display(), output = %output_path.display(), bytes = payload.len(), "payload extracted");
    Ok(())
}
