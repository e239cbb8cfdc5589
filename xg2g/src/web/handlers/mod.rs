pub mod auth;
pub mod hls;
pub mod intents;
pub mod playback;
pub mod sessions;
pub mod system;
