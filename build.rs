//! Build script for fwblock
//!
//! Embeds build-time information (git commit, dirty status, build timestamp)
//! shown by `fwblock --version`.

fn main() {
    shadow_rs::ShadowBuilder::builder()
        .build()
        .expect("Failed to generate build info");
}
