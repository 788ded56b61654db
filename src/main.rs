#[rocket::launch]
fn rocket() -> _ {
    newsdesk_api::rocket()
}
