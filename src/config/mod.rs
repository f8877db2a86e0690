mod client;

pub use client::{
    ClientConfig, ENV_API_KEY, ENV_BACKEND_URL, ENV_SESSION_FILE, HttpConfig,
    default_session_file,
};
