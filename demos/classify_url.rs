//! Example: Classify a single image URL
//!
//! Verifies that the vision API credentials and model are configured
//! correctly by classifying one publicly reachable image.
//!
//! Usage:
//!   cargo run --example classify_url -- https://example.com/dog.jpg
//!
//! Prerequisites:
//!   - .env file with OPENAI_API_KEY (and optionally OPENAI_BASE_URL, VISION_MODEL)

use image_description::services::classifier::{Classifier, ClassifyError, VisionClient};
use image_description::services::labels::classification_prompt;
use std::env;
use std::time::Duration;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    let image_url = env::args()
        .nth(1)
        .ok_or("usage: classify_url <image-url>")?;
    let api_key = env::var("OPENAI_API_KEY")?;
    let base_url =
        env::var("OPENAI_BASE_URL").unwrap_or_else(|_| "https://api.openai.com/v1".to_string());
    let model = env::var("VISION_MODEL").unwrap_or_else(|_| "gpt-4o-mini".to_string());

    println!("Model:  {}", model);
    println!("Image:  {}", image_url);

    let client = VisionClient::new(&base_url, &api_key, &model, Duration::from_secs(30))?;

    match client.classify(&image_url, &classification_prompt()).await {
        Ok(result) => {
            match result.label {
                Some(label) => println!("Label:  {}", label),
                None => println!("Label:  (unclassified)"),
            }
            println!("Tokens: {}", result.total_tokens);
            Ok(())
        }
        Err(ClassifyError::RateLimited { remaining }) => {
            println!("Rate limited, {} requests remaining", remaining);
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}
