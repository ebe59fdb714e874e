//! Secret command - print a signing secret.

use marquee_gateway::auth::TokenCodec;

use crate::ui;

/// Print a fresh hex signing secret.
pub fn run_secret() {
    ui::info("Add this to auth.jwtSecret or set MARQUEE_JWT_SECRET:");
    println!("{}", TokenCodec::generate_hex_secret());
}
