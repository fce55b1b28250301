// Copyright 2025 Lablup Inc. and Jeongkyu Shin
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use tracing_subscriber::EnvFilter;

/// Create an environment filter based on verbosity level
pub fn create_env_filter(verbosity: u8) -> EnvFilter {
    if std::env::var("RUST_LOG").is_ok() {
        // RUST_LOG overrides -v so dependency logs can be targeted directly
        EnvFilter::from_default_env()
    } else {
        match verbosity {
            0 => EnvFilter::new("kexec=warn"),
            1 => EnvFilter::new("kexec=info"),
            // -vv: include WebSocket frame handling
            2 => EnvFilter::new("kexec=debug,tokio_tungstenite=debug,tungstenite=debug"),
            _ => EnvFilter::new("kexec=trace,tokio_tungstenite=trace,tungstenite=trace,reqwest=debug"),
        }
    }
}

/// Initialize console logging on stderr.
///
/// Stdout carries the remote process output, so diagnostics never go there.
/// Calling this twice is harmless; the second subscriber is discarded.
pub fn init_logging(verbosity: u8) {
    let filter = create_env_filter(verbosity);

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[serial_test::serial]
    fn test_create_env_filter() {
        let original = std::env::var("RUST_LOG").ok();
        std::env::remove_var("RUST_LOG");

        assert_eq!(create_env_filter(0).to_string(), "kexec=warn");
        assert_eq!(create_env_filter(1).to_string(), "kexec=info");
        assert!(create_env_filter(2).to_string().contains("kexec=debug"));
        assert!(create_env_filter(7).to_string().contains("kexec=trace"));

        if let Some(value) = original {
            std::env::set_var("RUST_LOG", value);
        }
    }

    #[test]
    fn test_init_logging_twice() {
        init_logging(0);
        init_logging(3);
    }
}
