pub async fn health() -> &'static str {
    "Parley relay is running"
}
