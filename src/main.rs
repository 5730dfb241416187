#[rocket::main]
async fn main() -> Result<(), rocket::Error> {
    let _ = home_hub::rocket().launch().await?;
    Ok(())
}
