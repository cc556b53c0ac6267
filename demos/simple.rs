use gcp_adc::{GoogleAuth, GoogleAuthOptions};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let auth = GoogleAuth::new(GoogleAuthOptions::default())?;
    let credential = auth.credential().await?;
    println!("credential: {}", credential.describe());

    let token = auth.access_token().await?;
    println!("token expires at {:?}", token.expires_at());

    match auth.project_id().await {
        Ok(project_id) => println!("project: {project_id}"),
        Err(err) => println!("no project: {err}"),
    }

    Ok(())
}
