//! `taskpilot classify` — Show how a failure would be handled.

use taskpilot_engine::FailureClassifier;

pub fn run(error: &str, attempt: u32, max_retries: u32) {
    let strategy = FailureClassifier::new(max_retries).classify(error, attempt);
    println!("{strategy}");
}
