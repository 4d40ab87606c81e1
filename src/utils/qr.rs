//! QR 코드 렌더링 모듈.

use std::io::Cursor;

use base64::{engine::general_purpose::STANDARD, Engine};
use image::{ImageFormat, Rgb};
use qrcode::{EcLevel, QrCode};

use crate::error::AppResult;

/// Brand color used for dark modules (#667eea).
pub const DARK_COLOR: Rgb<u8> = Rgb([0x66, 0x7e, 0xea]);

/// Light module color.
pub const LIGHT_COLOR: Rgb<u8> = Rgb([0xff, 0xff, 0xff]);

/// Pixels per QR module.
pub const MODULE_SIZE: u32 = 10;

/// Builds the text encoded in a share's QR code.
///
/// With a public base URL the code points straight at the receive page,
/// otherwise it carries the code in a human-readable form.
#[must_use]
pub fn share_qr_payload(code: &str, public_base_url: &str) -> String {
    if public_base_url.is_empty() {
        format!("SecureShare Code: {code}")
    } else {
        format!("{}/s/{code}", public_base_url.trim_end_matches('/'))
    }
}

/// Renders `data` as a PNG QR code.
pub fn render_png(data: &str) -> AppResult<Vec<u8>> {
    let code = QrCode::with_error_correction_level(data.as_bytes(), EcLevel::L)?;

    let image = code
        .render::<Rgb<u8>>()
        .dark_color(DARK_COLOR)
        .light_color(LIGHT_COLOR)
        .module_dimensions(MODULE_SIZE, MODULE_SIZE)
        .quiet_zone(true)
        .build();

    let mut png = Vec::new();
    image.write_to(&mut Cursor::new(&mut png), ImageFormat::Png)?;
    Ok(png)
}

/// Renders `data` as an inline `data:` URI suitable for an `<img>` tag.
pub fn render_data_uri(data: &str) -> AppResult<String> {
    let png = render_png(data)?;
    Ok(format!("data:image/png;base64,{}", STANDARD.encode(png)))
}
