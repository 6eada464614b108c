use url::form_urlencoded;

pub const QR_IMAGE_ENDPOINT: &str = "https://api.qrserver.com/v1/create-qr-code/";
pub const QR_IMAGE_SIZE: &str = "300x300";

/// Image URL that renders `qr_content`. Pure string transform, no request is made.
pub fn qr_image_url(qr_content: &str) -> String {
    let encoded: String = form_urlencoded::byte_serialize(qr_content.as_bytes()).collect();
    format!("{}?size={}&data={}", QR_IMAGE_ENDPOINT, QR_IMAGE_SIZE, encoded)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_qr_image_url_encodes_content() {
        let url = qr_image_url("00020101021226&5802ID=x y");
        assert_eq!(
            url,
            "https://api.qrserver.com/v1/create-qr-code/?size=300x300&data=00020101021226%265802ID%3Dx+y"
        );
    }

    #[test]
    fn test_qr_image_url_is_deterministic() {
        assert_eq!(qr_image_url("abc"), qr_image_url("abc"));
    }
}
