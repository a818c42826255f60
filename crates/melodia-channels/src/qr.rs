//! QR code rendering for pairing challenges.

use melodia_core::error::BotError;

/// Generate a compact QR code for terminal display using Unicode half-block characters.
///
/// Packs two rows of modules into one line of text using `▀`, `▄`, `█`, and space.
pub fn generate_qr_terminal(qr_data: &str) -> Result<String, BotError> {
    use qrcode::{Color, EcLevel, QrCode};

    let code = QrCode::with_error_correction_level(qr_data.as_bytes(), EcLevel::L)
        .map_err(|e| BotError::Transport(format!("QR generation failed: {e}")))?;

    let width = code.width();
    let colors: Vec<Color> = code.into_colors();
    let is_dark = |row: usize, col: usize| row < width && colors[row * width + col] == Color::Dark;

    let mut out = String::new();
    for row in (0..width).step_by(2) {
        for col in 0..width {
            out.push(match (is_dark(row, col), is_dark(row + 1, col)) {
                (true, true) => '█',
                (true, false) => '▀',
                (false, true) => '▄',
                (false, false) => ' ',
            });
        }
        out.push('\n');
    }

    Ok(out)
}

/// Generate a QR code as PNG image bytes.
pub fn generate_qr_image(qr_data: &str) -> Result<Vec<u8>, BotError> {
    use image::{ImageBuffer, Luma};
    use qrcode::{Color, EcLevel, QrCode};

    let code = QrCode::with_error_correction_level(qr_data.as_bytes(), EcLevel::L)
        .map_err(|e| BotError::Transport(format!("QR generation failed: {e}")))?;

    let module_size: u32 = 8;
    let quiet_zone: u32 = 4;
    let modules = code.width() as u32;
    let img_size = (modules + quiet_zone * 2) * module_size;

    let img = ImageBuffer::from_fn(img_size, img_size, |x, y| {
        let (cx, cy) = (x / module_size, y / module_size);
        if cx < quiet_zone || cy < quiet_zone {
            return Luma([255u8]);
        }
        let (mx, my) = (cx - quiet_zone, cy - quiet_zone);
        if mx >= modules || my >= modules {
            return Luma([255u8]);
        }
        match code[(mx as usize, my as usize)] {
            Color::Dark => Luma([0u8]),
            Color::Light => Luma([255u8]),
        }
    });

    let mut buf = std::io::Cursor::new(Vec::new());
    img.write_to(&mut buf, image::ImageFormat::Png)
        .map_err(|e| BotError::Transport(format!("PNG encoding failed: {e}")))?;

    Ok(buf.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_qr_terminal() {
        let qr = generate_qr_terminal("2@challenge,abc").unwrap();
        assert!(!qr.is_empty());
        assert!(qr.lines().count() > 5);
    }

    #[test]
    fn test_generate_qr_image_is_png() {
        let png = generate_qr_image("2@challenge,abc").unwrap();
        assert_eq!(&png[..4], &[0x89, 0x50, 0x4E, 0x47]);
    }
}
