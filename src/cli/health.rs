//! Health checks against a running server. Exit codes: 0 healthy,
//! 1 unhealthy, 3 connection error.

use super::client::StudioClient;

pub async fn run_health(addr: &str) -> i32 {
    let client = match StudioClient::new(addr) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error: {}", e);
            return 3;
        }
    };
    match client.health().await {
        Ok(report) => {
            match serde_json::to_string_pretty(&report) {
                Ok(json) => println!("{}", json),
                Err(_) => println!("{:?}", report),
            }
            if report.ready {
                0
            } else {
                1
            }
        }
        Err(e) => {
            eprintln!("Error connecting to diffusion-studio at {}: {}", addr, e);
            3
        }
    }
}

async fn check_endpoint(addr: &str, path: &str) -> i32 {
    let client = match StudioClient::new(addr) {
        Ok(c) => c,
        Err(_) => return 3,
    };
    match client.get_raw(path).await {
        Ok((200, _)) => 0,
        Ok(_) => 1,
        Err(_) => 3,
    }
}

pub async fn run_liveness(addr: &str) -> i32 {
    check_endpoint(addr, "/health/live").await
}

pub async fn run_readiness(addr: &str) -> i32 {
    check_endpoint(addr, "/health/ready").await
}
