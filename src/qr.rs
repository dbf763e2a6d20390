//! QR artifact rendering.
//!
//! Each acquired record gets a small SVG QR code encoding its barcode, for
//! printing onto the physical copy. Rendering is deterministic and cheap;
//! storage of the artifact is the pipeline's concern.

use qrcode::QrCode;
use qrcode::render::svg;
use thiserror::Error;

/// Rendered image dimensions in SVG units.
const QR_MIN_DIMENSIONS: u32 = 200;

/// QR rendering errors.
#[derive(Debug, Error)]
pub enum QrError {
    /// The payload could not be encoded as a QR symbol.
    #[error("failed to encode QR payload: {0}")]
    Encode(#[from] qrcode::types::QrError),
}

/// Renders `payload` as an SVG QR image, returned as UTF-8 bytes.
///
/// # Errors
///
/// Returns [`QrError::Encode`] if the payload exceeds QR capacity.
pub fn render_svg(payload: &str) -> Result<Vec<u8>, QrError> {
    let code = QrCode::new(payload.as_bytes())?;
    let image = code
        .render::<svg::Color<'_>>()
        .min_dimensions(QR_MIN_DIMENSIONS, QR_MIN_DIMENSIONS)
        .build();
    Ok(image.into_bytes())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_render_svg_produces_svg_document() {
        let svg = render_svg("BK1756300000000X7Q2").unwrap();
        let text = String::from_utf8(svg).unwrap();
        assert!(text.contains("<svg"));
        assert!(text.contains("</svg>"));
    }

    #[test]
    fn test_render_svg_is_deterministic() {
        let a = render_svg("BK123ABCD").unwrap();
        let b = render_svg("BK123ABCD").unwrap();
        assert_eq!(a, b);

        let c = render_svg("BK456WXYZ").unwrap();
        assert_ne!(a, c);
    }

    #[test]
    fn test_render_svg_rejects_oversized_payload() {
        // QR capacity for byte data tops out under 3000 characters.
        let huge = "x".repeat(10_000);
        assert!(render_svg(&huge).is_err());
    }
}
