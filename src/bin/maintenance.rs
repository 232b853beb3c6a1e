use std::env;

use anyhow::{Context, Result};
use chrono::{Datelike, Utc};
use diesel::pg::PgConnection;
use diesel::prelude::*;
use tracing_subscriber::EnvFilter;

use stammbaum::{
    accounts::{create_account, sync_memberships, NewAccount},
    ancestors::person::{move_unparsed_dates_to_note, presumed_living, update_person},
    ancestors::{Confidentiality, PersonFields},
    config::AppConfig,
    db,
    models::{Person, User},
    schema::{persons, users},
};

const USAGE: &str = "Usage: maintenance <command>\n\
    \n\
    Commands:\n  \
    create-superuser <email> <password>\n  \
    resync-users\n  \
    apply-confidentiality\n  \
    move-unparsed-dates";

fn main() -> Result<()> {
    dotenv::dotenv().ok();
    init_tracing();

    let mut args = env::args().skip(1);
    let command = args.next();
    let Some(command) = command.as_deref() else {
        eprintln!("{USAGE}");
        std::process::exit(1);
    };
    if !matches!(
        command,
        "create-superuser" | "resync-users" | "apply-confidentiality" | "move-unparsed-dates"
    ) {
        eprintln!("Unknown command: {command}\n{USAGE}");
        std::process::exit(1);
    }

    let config = AppConfig::from_env()?;
    tracing::info!(
        component = "maintenance",
        database_url = %config.redacted_database_url(),
        command,
        "loaded backend configuration"
    );
    let pool = db::init_pool_with_size(&config.database_url, 1)?;
    db::run_migrations(&pool)?;
    let mut conn = pool.get().context("failed to get database connection")?;

    match command {
        "create-superuser" => {
            let email = args.next().context(USAGE)?;
            let password = args.next().context(USAGE)?;
            create_superuser(&mut conn, &config, email, password)
        }
        "resync-users" => resync_users(&mut conn),
        "apply-confidentiality" => apply_confidentiality(&mut conn),
        _ => move_unparsed_dates(&mut conn),
    }
}

fn create_superuser(
    conn: &mut PgConnection,
    config: &AppConfig,
    email: String,
    password: String,
) -> Result<()> {
    let user = create_account(
        conn,
        NewAccount {
            email,
            password,
            first_name: "Admin".into(),
            last_name: String::new(),
            is_active: true,
            is_staff: true,
            is_superuser: true,
            family_1: config.family_trees.first().cloned(),
            family_2: config.family_trees.get(1).cloned(),
            ..NewAccount::default()
        },
    )
    .map_err(anyhow::Error::new)?;
    println!("Created superuser {} ({}).", user.email, user.id);
    Ok(())
}

fn resync_users(conn: &mut PgConnection) -> Result<()> {
    let all: Vec<User> = users::table
        .select(User::as_select())
        .load(conn)
        .context("failed to load users")?;
    for user in &all {
        sync_memberships(conn, user)
            .with_context(|| format!("failed to sync memberships of {}", user.email))?;
    }
    println!("Synchronized groups and permissions of {} users.", all.len());
    Ok(())
}

fn load_persons(conn: &mut PgConnection) -> Result<Vec<Person>> {
    persons::table
        .order(persons::refn.asc())
        .select(Person::as_select())
        .load(conn)
        .context("failed to load persons")
}

/// Restricts unconfidential persons who are presumably still alive.
fn apply_confidentiality(conn: &mut PgConnection) -> Result<()> {
    let year = Utc::now().year();
    let mut changed = 0;
    for person in load_persons(conn)? {
        if Confidentiality::of(&person) != Confidentiality::No {
            continue;
        }
        let fields = PersonFields::from_person(&person);
        if !presumed_living(&fields, year) {
            continue;
        }
        update_person(
            conn,
            &person,
            person.refn.clone(),
            Confidentiality::Restricted,
            fields,
            None,
        )?;
        changed += 1;
    }
    println!("Restricted {changed} presumably living persons.");
    Ok(())
}

fn move_unparsed_dates(conn: &mut PgConnection) -> Result<()> {
    let mut changed = 0;
    for person in load_persons(conn)? {
        let mut fields = PersonFields::from_person(&person);
        if !move_unparsed_dates_to_note(&mut fields) {
            continue;
        }
        update_person(
            conn,
            &person,
            person.refn.clone(),
            Confidentiality::of(&person),
            fields,
            None,
        )?;
        changed += 1;
    }
    println!("Moved unparsed dates of {changed} persons into their notes.");
    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();
}
