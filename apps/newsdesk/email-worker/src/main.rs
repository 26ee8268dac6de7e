//! Email Worker Service - Entry Point
//!
//! Background worker that sends notification batches from the email queue.

#[tokio::main]
async fn main() -> eyre::Result<()> {
    newsdesk_email_worker::run().await
}
