use x_api::{Client, Request, XApiError};

#[tokio::main]
pub async fn main() -> Result<(), XApiError> {
    let client = Client::new("access_token");

    let req = Request::posts().create("Hello from agendify");

    let res = client.send(req).await?;
    println!("created post {}", res.data.id);
    Ok(())
}
