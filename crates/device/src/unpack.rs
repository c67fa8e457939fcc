//! Pixel unpack kernels
//!
//! Turn one native transport payload into the output images of a mode.
//! Destinations are ordered like [`ModeSelection::outputs`].

use contracts::{ContractError, Format, ModeSelection, Unpacker};

/// Integer BT.601 limited-range conversion
#[inline(always)]
fn yuv_to_rgb(y: i32, u: i32, v: i32) -> [u8; 3] {
    let c = (y - 16).max(0);
    let d = u - 128;
    let e = v - 128;
    let r = (298 * c + 409 * e + 128) >> 8;
    let g = (298 * c - 100 * d - 208 * e + 128) >> 8;
    let b = (298 * c + 516 * d + 128) >> 8;
    [
        r.clamp(0, 255) as u8,
        g.clamp(0, 255) as u8,
        b.clamp(0, 255) as u8,
    ]
}

/// Write one RGB pixel in the layout of `format`
#[inline(always)]
fn store(px: &mut [u8], [r, g, b]: [u8; 3], format: Format) {
    match format {
        Format::Bgr8 => px.copy_from_slice(&[b, g, r]),
        Format::Rgba8 => px.copy_from_slice(&[r, g, b, 255]),
        Format::Bgra8 => px.copy_from_slice(&[b, g, r, 255]),
        _ => px.copy_from_slice(&[r, g, b]),
    }
}

fn yuyv_to_rgb(dst: &mut [u8], src: &[u8], format: Format) -> Result<(), ContractError> {
    let bpp = format.bytes_per_pixel();
    if !matches!(
        format,
        Format::Rgb8 | Format::Bgr8 | Format::Rgba8 | Format::Bgra8
    ) {
        return Err(ContractError::unsupported_stream(
            format,
            "yuyv can only be unpacked to rgb layouts",
        ));
    }

    for (dst_px, src_px) in dst.chunks_exact_mut(bpp * 2).zip(src.chunks_exact(4)) {
        let y0 = src_px[0] as i32;
        let u = src_px[1] as i32;
        let y1 = src_px[2] as i32;
        let v = src_px[3] as i32;
        let (first, second) = dst_px.split_at_mut(bpp);
        store(first, yuv_to_rgb(y0, u, v), format);
        store(second, yuv_to_rgb(y1, u, v), format);
    }
    Ok(())
}

/// Unpack `src` into one destination buffer per output of `selection`
///
/// # Errors
/// `Other` when the number of destinations does not match the outputs,
/// `UnsupportedStream` when the kernel cannot produce an output format.
pub fn unpack(
    selection: &ModeSelection,
    dest: &mut [&mut [u8]],
    src: &[u8],
) -> Result<(), ContractError> {
    if dest.len() != selection.outputs.len() {
        return Err(ContractError::Other(format!(
            "expected {} unpack destinations, got {}",
            selection.outputs.len(),
            dest.len()
        )));
    }

    match selection.mode.unpacker {
        Unpacker::Passthrough => {
            for dst in dest.iter_mut() {
                let n = dst.len().min(src.len());
                dst[..n].copy_from_slice(&src[..n]);
            }
        }
        Unpacker::YuyvToRgb8 => {
            for (dst, output) in dest.iter_mut().zip(&selection.outputs) {
                yuyv_to_rgb(dst, src, output.format)?;
            }
        }
        Unpacker::SplitPlanes => {
            let mut offset = 0;
            for (dst, output) in dest.iter_mut().zip(&selection.outputs) {
                let size = output.format.frame_size(selection.width(), selection.height());
                let plane = src.get(offset..offset + size).unwrap_or(&[]);
                let n = dst.len().min(plane.len());
                dst[..n].copy_from_slice(&plane[..n]);
                offset += size;
            }
        }
    }
    Ok(())
}
