//! Search the model catalog directly, without a running server.

use crate::config;
use crate::models::{HubCatalog, ModelCatalog};

/// Returns exit code: 0 on success, 3 when the catalog is unreachable.
pub async fn run_search(query: &str, limit: usize) -> i32 {
    let catalog = match HubCatalog::new(config::load().catalog) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error: {}", e);
            return 3;
        }
    };
    match catalog.search(query, limit).await {
        Ok(models) => {
            print_models(&models);
            0
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            3
        }
    }
}

pub fn print_models(models: &[String]) {
    if models.is_empty() {
        println!("No matching text-to-image models.");
        return;
    }
    for (rank, id) in models.iter().enumerate() {
        println!("{:>3}. {}", rank + 1, id);
    }
}
