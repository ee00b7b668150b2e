//! HTTP routes

pub mod admin;
pub mod health;
pub mod proxy;
pub mod videos;

/// Video identifiers are exactly 11 URL-safe base64 characters.
pub fn valid_video_id(id: &str) -> bool {
    id.len() == 11
        && id
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
}
