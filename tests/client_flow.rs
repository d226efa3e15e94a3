use librarycard::{
    Address, AddressStep, Client, Config, Credentials, Flow, FlowKind, OutOfStateChoice,
    PersonalInfo, Placemark, Step,
};
use mockito::{Matcher, Server};
use url::Url;

fn new_york() -> Placemark {
    Placemark {
        iso_country_code: Some("US".into()),
        administrative_area: Some("New York".into()),
        postal_code: Some("11201".into()),
    }
}

#[tokio::test]
async fn texas_home_with_new_york_work_address() {
    let mut server = Server::new_async().await;

    let home_mock = server
        .mock("POST", "/v0.3/validations/address")
        .match_body(Matcher::PartialJson(serde_json::json!({
            "address": {"state": "TX"}
        })))
        .with_status(200)
        .with_body(
            r#"{"type": "valid-address", "cardType": "none", "address":
                {"line1": "1 MAIN ST", "city": "AUSTIN", "state": "TX", "zip": "73301"}}"#,
        )
        .create_async()
        .await;

    let work_mock = server
        .mock("POST", "/v0.3/validations/address")
        .match_body(Matcher::PartialJson(serde_json::json!({
            "address": {"state": "NY"},
            "is_work_or_school_address": true
        })))
        .with_status(200)
        .with_body(
            r#"{"type": "valid-address", "cardType": "temporary", "address":
                {"line1": "1 LIBERTY PLZ", "city": "NEW YORK", "state": "NY", "zip": "10006"}}"#,
        )
        .create_async()
        .await;

    let username_mock = server
        .mock("POST", "/v0.3/validations/username")
        .with_status(200)
        .with_body(r#"{"type": "available-username"}"#)
        .create_async()
        .await;

    let create_mock = server
        .mock("POST", "/v0.3/create_patron")
        .match_body(Matcher::PartialJson(serde_json::json!({
            "username": "ada1815",
            "address": {"state": "TX", "hasBeenValidated": true},
            "work_or_school_address": {"state": "NY"},
            "policyType": "simplye",
            "usernameHasBeenValidated": true
        })))
        .with_status(200)
        .with_body(r#"{"barcode": "25555012345678"}"#)
        .create_async()
        .await;

    let client = Client::new(Config::new(Url::parse(&server.url()).unwrap())).unwrap();
    let mut flow = Flow::new(
        client,
        FlowKind::Regular,
        Box::new(|_: &Credentials, _: bool| {}),
    );

    flow.accept_introduction(true, true).unwrap();
    flow.resolve_location(Ok(new_york())).await.unwrap();

    let home = Address::new("1 Main St", None, "Austin", "Texas", "73301").unwrap();
    let step = flow.submit_address(home).await.unwrap();
    assert!(matches!(step, Step::OutOfStateChoice { .. }));

    let step = flow.choose_out_of_state(OutOfStateChoice::Work).unwrap();
    assert!(matches!(step, Step::Address(AddressStep::Work(home)) if home.region() == "TX"));

    let work = Address::new("1 Liberty Plaza", None, "New York", "NY", "10006").unwrap();
    assert_eq!(&Step::NameAndEmail, flow.submit_address(work).await.unwrap());

    flow.submit_personal_info(PersonalInfo {
        first_name: "Ada".into(),
        last_name: "Lovelace".into(),
        email: Some("ada@example.com".into()),
        ..Default::default()
    })
    .unwrap();
    flow.submit_username_and_password("ada1815".into(), "Analytic1!".into())
        .await
        .unwrap();

    let step = flow.submit().await.unwrap();
    assert!(matches!(
        step,
        Step::Credentials(credentials) if credentials.barcode == "25555012345678"
    ));

    home_mock.assert_async().await;
    work_mock.assert_async().await;
    username_mock.assert_async().await;
    create_mock.assert_async().await;
}
