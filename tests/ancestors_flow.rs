mod common;

use anyhow::{Context, Result};
use axum::http::StatusCode;
use common::{acquire_db_lock, body_json, SeedUser, TestApp};
use serde_json::{json, Value};
use stammbaum::ancestors::import::{import_rows, read_rows};

async fn create_person(app: &TestApp, token: &str, body: Value) -> Result<Value> {
    let response = app
        .post_json("/api/ancestors/persons", &body, Some(token))
        .await?;
    assert_eq!(response.status(), StatusCode::CREATED);
    body_json(response).await
}

fn id_of(person: &Value) -> Result<String> {
    person["id"]
        .as_str()
        .map(str::to_string)
        .context("person without id")
}

#[tokio::test]
async fn persons_get_sequential_refns_and_derived_names() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let app = TestApp::new().await?;
    let (_, token) = app
        .user_with_token(SeedUser::member("ahnen@example.org", &["kempe"]))
        .await?;

    let first = create_person(
        &app,
        &token,
        json!({ "givn": "Karl", "surn": "Kempe", "name_nick": "Kalle", "birt_date": "03.02.1901" }),
    )
    .await?;
    assert_eq!(first["refn"], "@I1@");
    assert_eq!(first["name"], "Karl 'Kalle' Kempe");
    assert_eq!(first["birth_date_formatted"], "1901-02-03");
    assert_eq!(first["family_1"], "kempe");

    let second = create_person(&app, &token, json!({ "givn": "Erna" })).await?;
    assert_eq!(second["refn"], "@I2@");

    let taken = app
        .post_json(
            "/api/ancestors/persons",
            &json!({ "refn": "@I1@", "givn": "Doppelt" }),
            Some(&token),
        )
        .await?;
    assert_eq!(taken.status(), StatusCode::BAD_REQUEST);

    let id = id_of(&second)?;
    let response = app
        .patch_json(
            &format!("/api/ancestors/persons/{id}"),
            &json!({ "surn": "Kempe", "occu": null }),
            Some(&token),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await?["name"], "Erna Kempe");

    let listed = body_json(
        app.get("/api/ancestors/persons?search=erna", Some(&token))
            .await?,
    )
    .await?;
    assert_eq!(listed.as_array().map(Vec::len), Some(1));

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn confidential_persons_are_masked() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let app = TestApp::new().await?;
    let (_, token) = app
        .user_with_token(SeedUser::member("ahnen@example.org", &["kempe"]))
        .await?;

    let restricted = create_person(
        &app,
        &token,
        json!({ "givn": "Lena", "surn": "Kempe", "confidential": "restricted" }),
    )
    .await?;
    assert_eq!(restricted["name"], "Lena Kempe");
    assert_eq!(restricted["surn"], "");
    assert_eq!(restricted["refn"], "");
    assert_eq!(restricted["confidential"], "restricted");

    let hidden = create_person(
        &app,
        &token,
        json!({ "givn": "Otto", "surn": "Kempe", "confidential": "yes" }),
    )
    .await?;
    assert_eq!(hidden["name"], "vertraulich");
    assert_eq!(hidden["givn"], "");

    let summaries = body_json(app.get("/api/ancestors/persons", Some(&token)).await?).await?;
    let names: Vec<&str> = summaries
        .as_array()
        .context("list response")?
        .iter()
        .filter_map(|person| person["name"].as_str())
        .collect();
    assert!(names.contains(&"vertraulich"));
    assert!(!names.contains(&"Otto Kempe"));

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn persons_are_scoped_to_families() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let app = TestApp::new().await?;
    let (_, kempe) = app
        .user_with_token(SeedUser::member("kempe@example.org", &["kempe"]))
        .await?;
    let (_, huenten) = app
        .user_with_token(SeedUser::member("huenten@example.org", &["huenten"]))
        .await?;
    let (_, admin) = app.user_with_token(SeedUser::admin("admin@example.org")).await?;

    let person = create_person(&app, &kempe, json!({ "givn": "Karl" })).await?;
    let id = id_of(&person)?;

    let foreign = app
        .post_json(
            "/api/ancestors/persons",
            &json!({ "givn": "Fremd", "family_1": "huenten" }),
            Some(&kempe),
        )
        .await?;
    assert_eq!(foreign.status(), StatusCode::BAD_REQUEST);

    let unknown = app
        .post_json(
            "/api/ancestors/persons",
            &json!({ "givn": "Fremd", "family_1": "meier" }),
            Some(&admin),
        )
        .await?;
    assert_eq!(unknown.status(), StatusCode::BAD_REQUEST);

    let hidden = app
        .get(&format!("/api/ancestors/persons/{id}"), Some(&huenten))
        .await?;
    assert_eq!(hidden.status(), StatusCode::NOT_FOUND);

    let seen = app
        .get(&format!("/api/ancestors/persons/{id}"), Some(&admin))
        .await?;
    assert_eq!(seen.status(), StatusCode::OK);

    let forbidden = app
        .delete(&format!("/api/ancestors/persons/{id}"), Some(&kempe))
        .await?;
    assert_eq!(forbidden.status(), StatusCode::FORBIDDEN);

    let deleted = app
        .delete(&format!("/api/ancestors/persons/{id}"), Some(&admin))
        .await?;
    assert_eq!(deleted.status(), StatusCode::NO_CONTENT);

    let anonymous = app.get("/api/ancestors/persons", None).await?;
    assert_eq!(anonymous.status(), StatusCode::UNAUTHORIZED);

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn saving_a_marriage_updates_spouse_and_children() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let app = TestApp::new().await?;
    let (_, token) = app
        .user_with_token(SeedUser::member("ahnen@example.org", &["kempe"]))
        .await?;

    let karl = id_of(&create_person(&app, &token, json!({ "givn": "Karl", "sex": "M" })).await?)?;
    let erna = id_of(&create_person(&app, &token, json!({ "givn": "Erna", "sex": "F" })).await?)?;
    let hans = id_of(&create_person(&app, &token, json!({ "givn": "Hans", "sex": "M" })).await?)?;

    let input = json!({
        "marriages": [{
            "spouse_id": erna,
            "marriage_date": "01.05.1925",
            "family_status": "married",
            "children": [hans],
        }]
    });
    let response = app
        .put_json(
            &format!("/api/ancestors/relations/{karl}"),
            &input,
            Some(&token),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    let saved = body_json(response).await?;
    assert_eq!(saved["relation"]["marriages"][0]["spouse"]["id"], erna.as_str());
    let touched = saved["touched"].as_array().context("touched ids")?;
    assert_eq!(touched.len(), 3);

    let spouse = body_json(
        app.get(&format!("/api/ancestors/relations/{erna}"), Some(&token))
            .await?,
    )
    .await?;
    assert_eq!(spouse["marriages"][0]["spouse"]["id"], karl.as_str());
    assert_eq!(spouse["marriages"][0]["marriage_date"], "01.05.1925");
    assert_eq!(spouse["marriages"][0]["children"][0]["id"], hans.as_str());

    let child = body_json(
        app.get(&format!("/api/ancestors/relations/{hans}"), Some(&token))
            .await?,
    )
    .await?;
    assert_eq!(child["father"]["id"], karl.as_str());
    assert_eq!(child["mother"]["id"], erna.as_str());

    // Saving the same relation again leaves every record as it was.
    let again = body_json(
        app.put_json(
            &format!("/api/ancestors/relations/{karl}"),
            &input,
            Some(&token),
        )
        .await?,
    )
    .await?;
    assert_eq!(again["relation"], saved["relation"]);
    let spouse_again = body_json(
        app.get(&format!("/api/ancestors/relations/{erna}"), Some(&token))
            .await?,
    )
    .await?;
    assert_eq!(
        spouse_again["marriages"].as_array().map(Vec::len),
        Some(1)
    );

    let all = body_json(app.get("/api/ancestors/relations", Some(&token)).await?).await?;
    assert_eq!(all.as_array().map(Vec::len), Some(3));

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn person_without_relation_reads_empty() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let app = TestApp::new().await?;
    let (_, token) = app
        .user_with_token(SeedUser::member("ahnen@example.org", &["kempe"]))
        .await?;

    let id = id_of(&create_person(&app, &token, json!({ "givn": "Einzeln" })).await?)?;
    let relation = body_json(
        app.get(&format!("/api/ancestors/relations/{id}"), Some(&token))
            .await?,
    )
    .await?;
    assert_eq!(relation["father"], Value::Null);
    assert_eq!(relation["marriages"], json!([]));

    app.cleanup().await?;
    Ok(())
}

async fn relation_of(app: &TestApp, token: &str, person: &str) -> Result<Value> {
    let response = app
        .get(&format!("/api/ancestors/relations/{person}"), Some(token))
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    body_json(response).await
}

async fn save(app: &TestApp, token: &str, person: &str, input: &Value) -> Result<StatusCode> {
    let response = app
        .put_json(
            &format!("/api/ancestors/relations/{person}"),
            input,
            Some(token),
        )
        .await?;
    Ok(response.status())
}

#[tokio::test]
async fn saving_parents_registers_the_child_with_the_couple() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let app = TestApp::new().await?;
    let (_, token) = app
        .user_with_token(SeedUser::member("ahnen@example.org", &["kempe"]))
        .await?;

    let karl = id_of(&create_person(&app, &token, json!({ "givn": "Karl", "sex": "M" })).await?)?;
    let erna = id_of(&create_person(&app, &token, json!({ "givn": "Erna", "sex": "F" })).await?)?;
    let hans = id_of(&create_person(&app, &token, json!({ "givn": "Hans" })).await?)?;

    let status = save(
        &app,
        &token,
        &hans,
        &json!({ "father_id": karl, "mother_id": erna }),
    )
    .await?;
    assert_eq!(status, StatusCode::OK);

    let father = relation_of(&app, &token, &karl).await?;
    assert_eq!(father["marriages"].as_array().map(Vec::len), Some(1));
    assert_eq!(father["marriages"][0]["spouse"]["id"], erna.as_str());
    assert_eq!(father["marriages"][0]["children"][0]["id"], hans.as_str());

    let mother = relation_of(&app, &token, &erna).await?;
    assert_eq!(mother["marriages"][0]["spouse"]["id"], karl.as_str());
    assert_eq!(mother["marriages"][0]["children"][0]["id"], hans.as_str());

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn removing_a_child_unlinks_both_parents() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let app = TestApp::new().await?;
    let (_, token) = app
        .user_with_token(SeedUser::member("ahnen@example.org", &["kempe"]))
        .await?;

    let karl = id_of(&create_person(&app, &token, json!({ "givn": "Karl", "sex": "M" })).await?)?;
    let erna = id_of(&create_person(&app, &token, json!({ "givn": "Erna", "sex": "F" })).await?)?;
    let hans = id_of(&create_person(&app, &token, json!({ "givn": "Hans" })).await?)?;

    let with_child = json!({ "marriages": [{ "spouse_id": karl, "children": [hans] }] });
    assert_eq!(save(&app, &token, &erna, &with_child).await?, StatusCode::OK);
    let child = relation_of(&app, &token, &hans).await?;
    assert_eq!(child["father"]["id"], karl.as_str());
    assert_eq!(child["mother"]["id"], erna.as_str());

    let without_child = json!({ "marriages": [{ "spouse_id": karl, "children": [] }] });
    assert_eq!(save(&app, &token, &erna, &without_child).await?, StatusCode::OK);
    let child = relation_of(&app, &token, &hans).await?;
    assert_eq!(child["father"], Value::Null);
    assert_eq!(child["mother"], Value::Null);
    let father = relation_of(&app, &token, &karl).await?;
    assert_eq!(father["marriages"][0]["children"], json!([]));
    assert_eq!(father["marriages"][0]["spouse"]["id"], erna.as_str());

    // Dropping the marriage frees the spouse's side of it.
    assert_eq!(
        save(&app, &token, &erna, &json!({ "marriages": [] })).await?,
        StatusCode::OK
    );
    let father = relation_of(&app, &token, &karl).await?;
    assert_eq!(father["marriages"][0]["spouse"], Value::Null);

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn a_fifth_marriage_is_appended() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let app = TestApp::new().await?;
    let (_, token) = app
        .user_with_token(SeedUser::member("ahnen@example.org", &["kempe"]))
        .await?;

    let karl = id_of(&create_person(&app, &token, json!({ "givn": "Karl", "sex": "M" })).await?)?;
    let mut spouses = Vec::new();
    for givn in ["Anna", "Berta", "Clara", "Dora", "Emma"] {
        let spouse = create_person(&app, &token, json!({ "givn": givn, "sex": "F" })).await?;
        spouses.push(id_of(&spouse)?);
    }
    let marriages: Vec<Value> = spouses
        .iter()
        .map(|spouse| json!({ "spouse_id": spouse }))
        .collect();
    assert_eq!(
        save(&app, &token, &karl, &json!({ "marriages": marriages })).await?,
        StatusCode::OK
    );

    let relation = relation_of(&app, &token, &karl).await?;
    let saved = relation["marriages"].as_array().context("marriages")?;
    assert_eq!(saved.len(), 5);
    assert_eq!(saved[4]["position"], 5);
    assert_eq!(saved[4]["spouse"]["id"], spouses[4].as_str());

    let fifth = relation_of(&app, &token, &spouses[4]).await?;
    assert_eq!(fifth["marriages"][0]["spouse"]["id"], karl.as_str());

    let legacy = body_json(
        app.get(&format!("/api/ancestors/persons/{karl}/legacy"), Some(&token))
            .await?,
    )
    .await?;
    assert_eq!(legacy["marr_spou_name_4"], "Dora");
    assert!(legacy.get("marr_spou_name_5").is_none());

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn legacy_view_of_confidential_person_hides_relatives() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let app = TestApp::new().await?;
    let (_, token) = app
        .user_with_token(SeedUser::member("ahnen@example.org", &["kempe"]))
        .await?;

    let karl = id_of(&create_person(&app, &token, json!({ "givn": "Karl", "sex": "M" })).await?)?;
    let hidden = id_of(
        &create_person(
            &app,
            &token,
            json!({ "givn": "Geheim", "confidential": "yes" }),
        )
        .await?,
    )?;
    assert_eq!(
        save(&app, &token, &hidden, &json!({ "father_id": karl })).await?,
        StatusCode::OK
    );

    let legacy = body_json(
        app.get(&format!("/api/ancestors/persons/{hidden}/legacy"), Some(&token))
            .await?,
    )
    .await?;
    assert_eq!(legacy["name"], "vertraulich");
    assert_eq!(legacy["fath_name"], "");
    assert_eq!(legacy["fath_refn"], "");

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn relations_cannot_reach_into_other_families() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let app = TestApp::new().await?;
    let (_, kempe) = app
        .user_with_token(SeedUser::member("kempe@example.org", &["kempe"]))
        .await?;
    let (_, huenten) = app
        .user_with_token(SeedUser::member("huenten@example.org", &["huenten"]))
        .await?;

    let karl = id_of(&create_person(&app, &kempe, json!({ "givn": "Karl", "sex": "M" })).await?)?;
    let fremd = create_person(&app, &huenten, json!({ "givn": "Fremd", "sex": "F" })).await?;
    let fremd = id_of(&fremd)?;

    let status = save(
        &app,
        &kempe,
        &karl,
        &json!({ "marriages": [{ "spouse_id": fremd }] }),
    )
    .await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let untouched = relation_of(&app, &huenten, &fremd).await?;
    assert_eq!(untouched["marriages"], json!([]));

    app.cleanup().await?;
    Ok(())
}

async fn find_person(app: &TestApp, token: &str, search: &str) -> Result<String> {
    let listed = body_json(
        app.get(&format!("/api/ancestors/persons?search={search}"), Some(token))
            .await?,
    )
    .await?;
    let found = listed.as_array().context("person list")?;
    assert_eq!(found.len(), 1, "expected one match for {search}");
    id_of(&found[0])
}

#[tokio::test]
async fn import_links_children_regardless_of_row_order() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let app = TestApp::new().await?;
    let (_, token) = app
        .user_with_token(SeedUser::member("ahnen@example.org", &["kempe"]))
        .await?;

    const EXPORT: &str = "\
#REFN,GIVN,SURN,SEX,FATH.#REFN,MOTH.#REFN,MARR.SPOU.#REFN.1,MARR.DATE.1
@I4@,Lena,Kempe,F,@I1@,,,
@I3@,Hans,Kempe,M,@I1@,@I2@,,
@I2@,Erna,Kempe,F,,,@I1@,01.05.1950
@I1@,Karl,Kempe,M,,,@I2@,01.05.1950
";
    let summary = app
        .with_conn(|conn| {
            let rows = read_rows(EXPORT.as_bytes(), b',')?;
            let families = vec!["kempe".to_string(), "huenten".to_string()];
            Ok(import_rows(conn, rows, &families, Some("kempe"))?)
        })
        .await?;
    assert_eq!(summary.created, 4);
    assert_eq!(summary.skipped, 0);

    let karl = find_person(&app, &token, "Karl").await?;
    let erna = find_person(&app, &token, "Erna").await?;
    let hans = find_person(&app, &token, "Hans").await?;
    let lena = find_person(&app, &token, "Lena").await?;

    let daughter = relation_of(&app, &token, &lena).await?;
    assert_eq!(daughter["father"]["id"], karl.as_str());
    assert_eq!(daughter["mother"], Value::Null);

    let son = relation_of(&app, &token, &hans).await?;
    assert_eq!(son["father"]["id"], karl.as_str());
    assert_eq!(son["mother"]["id"], erna.as_str());

    let father = relation_of(&app, &token, &karl).await?;
    let marriages = father["marriages"].as_array().context("marriages")?;
    assert_eq!(marriages.len(), 2);
    assert_eq!(marriages[0]["spouse"]["id"], erna.as_str());
    assert_eq!(marriages[0]["marriage_date"], "01.05.1950");
    assert_eq!(marriages[0]["children"].as_array().map(Vec::len), Some(1));
    assert_eq!(marriages[0]["children"][0]["id"], hans.as_str());
    assert_eq!(marriages[1]["spouse"], Value::Null);
    assert_eq!(marriages[1]["children"][0]["id"], lena.as_str());

    let mother = relation_of(&app, &token, &erna).await?;
    assert_eq!(mother["marriages"].as_array().map(Vec::len), Some(1));
    assert_eq!(mother["marriages"][0]["children"].as_array().map(Vec::len), Some(1));

    app.cleanup().await?;
    Ok(())
}
