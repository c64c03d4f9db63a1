//! `pinefetch info <url>` – metadata probe, nothing is downloaded.

use anyhow::Result;
use pinefetch_core::tools::{self, MediaInfo};
use pinefetch_core::ConfigStore;

fn format_duration(secs: f64) -> String {
    let total = secs.round() as u64;
    let (h, m, s) = (total / 3600, (total % 3600) / 60, total % 60);
    if h > 0 {
        format!("{h}:{m:02}:{s:02}")
    } else {
        format!("{m}:{s:02}")
    }
}

fn print_info(info: &MediaInfo) {
    let dash = || "-".to_string();
    println!("Title:     {}", info.title.clone().unwrap_or_else(dash));
    println!("Uploader:  {}", info.uploader.clone().unwrap_or_else(dash));
    println!(
        "Duration:  {}",
        info.duration.map(format_duration).unwrap_or_else(dash)
    );
    if let Some(thumb) = &info.thumbnail {
        println!("Thumbnail: {thumb}");
    }
    if info.formats.is_empty() {
        return;
    }
    println!();
    println!("  {:<12} {:<6} {:>10} {:<12} {:<12}", "FORMAT", "EXT", "RES", "VCODEC", "ACODEC");
    for f in &info.formats {
        let res = match (f.width, f.height) {
            (Some(w), Some(h)) => format!("{w}x{h}"),
            (None, Some(h)) => format!("{h}p"),
            _ => "audio".to_string(),
        };
        println!(
            "  {:<12} {:<6} {:>10} {:<12} {:<12}",
            f.format_id.as_deref().unwrap_or("-"),
            f.ext.as_deref().unwrap_or("-"),
            res,
            f.vcodec.as_deref().unwrap_or("-"),
            f.acodec.as_deref().unwrap_or("-"),
        );
    }
}

pub async fn run_info(url: &str, store: &ConfigStore) -> Result<()> {
    let info = tools::media_info(url, store).await?;
    print_info(&info);
    Ok(())
}
