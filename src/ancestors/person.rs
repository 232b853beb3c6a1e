use chrono::{NaiveDate, Utc};
use diesel::pg::PgConnection;
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{Person, PersonRow};
use crate::schema::persons;

pub const UNKNOWN_NAME: &str = "Unbekannt";
const DATE_FORMAT: &str = "%d.%m.%Y";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Sex {
    #[serde(rename = "F")]
    Female,
    #[serde(rename = "M")]
    Male,
    #[serde(rename = "D")]
    Diverse,
}

impl Sex {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim() {
            "F" | "f" => Some(Sex::Female),
            "M" | "m" => Some(Sex::Male),
            "D" | "d" => Some(Sex::Diverse),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Sex::Female => "F",
            Sex::Male => "M",
            Sex::Diverse => "D",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Confidentiality {
    #[default]
    No,
    Restricted,
    Yes,
}

impl Confidentiality {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "no" | "" => Some(Confidentiality::No),
            "restricted" => Some(Confidentiality::Restricted),
            "yes" => Some(Confidentiality::Yes),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Confidentiality::No => "no",
            Confidentiality::Restricted => "restricted",
            Confidentiality::Yes => "yes",
        }
    }

    /// Stored values outside the known set are treated as fully confidential.
    pub fn of(person: &Person) -> Self {
        Self::parse(&person.confidential).unwrap_or(Confidentiality::Yes)
    }
}

/// Free-text attributes of a person as they arrive from the API or an
/// import file. Derived columns (`name`, parsed dates) are computed from
/// these on every write.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PersonFields {
    pub uid: Option<String>,
    pub surn: Option<String>,
    pub givn: Option<String>,
    pub sex: Option<String>,
    pub occu: Option<String>,
    pub chan_date: Option<String>,
    pub chan_date_time: Option<String>,
    pub birt_date: Option<String>,
    pub birt_plac: Option<String>,
    pub deat_date: Option<String>,
    pub deat_plac: Option<String>,
    pub note: Option<String>,
    pub chr_date: Option<String>,
    pub chr_plac: Option<String>,
    pub chr_addr: Option<String>,
    pub buri_date: Option<String>,
    pub buri_plac: Option<String>,
    pub name_rufname: Option<String>,
    pub name_npfx: Option<String>,
    pub name_nick: Option<String>,
    pub name_marnm: Option<String>,
    pub sour: Option<String>,
    pub reli: Option<String>,
    pub family_1: Option<String>,
    pub family_2: Option<String>,
}

impl PersonFields {
    pub const NAMES: [&'static str; 25] = [
        "uid",
        "surn",
        "givn",
        "sex",
        "occu",
        "chan_date",
        "chan_date_time",
        "birt_date",
        "birt_plac",
        "deat_date",
        "deat_plac",
        "note",
        "chr_date",
        "chr_plac",
        "chr_addr",
        "buri_date",
        "buri_plac",
        "name_rufname",
        "name_npfx",
        "name_nick",
        "name_marnm",
        "sour",
        "reli",
        "family_1",
        "family_2",
    ];

    pub fn from_person(person: &Person) -> Self {
        Self {
            uid: person.uid.clone(),
            surn: person.surn.clone(),
            givn: person.givn.clone(),
            sex: person.sex.clone(),
            occu: person.occu.clone(),
            chan_date: person.chan_date.clone(),
            chan_date_time: person.chan_date_time.clone(),
            birt_date: person.birt_date.clone(),
            birt_plac: person.birt_plac.clone(),
            deat_date: person.deat_date.clone(),
            deat_plac: person.deat_plac.clone(),
            note: person.note.clone(),
            chr_date: person.chr_date.clone(),
            chr_plac: person.chr_plac.clone(),
            chr_addr: person.chr_addr.clone(),
            buri_date: person.buri_date.clone(),
            buri_plac: person.buri_plac.clone(),
            name_rufname: person.name_rufname.clone(),
            name_npfx: person.name_npfx.clone(),
            name_nick: person.name_nick.clone(),
            name_marnm: person.name_marnm.clone(),
            sour: person.sour.clone(),
            reli: person.reli.clone(),
            family_1: person.family_1.clone(),
            family_2: person.family_2.clone(),
        }
    }

    /// Assigns a field by its column name. Blank values clear the field.
    /// Returns `false` for names that are not person attributes.
    pub fn set(&mut self, field: &str, value: Option<String>) -> bool {
        let value = value
            .map(|raw| raw.trim().to_string())
            .filter(|trimmed| !trimmed.is_empty());
        let slot = match field {
            "uid" => &mut self.uid,
            "surn" => &mut self.surn,
            "givn" => &mut self.givn,
            "sex" => &mut self.sex,
            "occu" => &mut self.occu,
            "chan_date" => &mut self.chan_date,
            "chan_date_time" => &mut self.chan_date_time,
            "birt_date" => &mut self.birt_date,
            "birt_plac" => &mut self.birt_plac,
            "deat_date" => &mut self.deat_date,
            "deat_plac" => &mut self.deat_plac,
            "note" => &mut self.note,
            "chr_date" => &mut self.chr_date,
            "chr_plac" => &mut self.chr_plac,
            "chr_addr" => &mut self.chr_addr,
            "buri_date" => &mut self.buri_date,
            "buri_plac" => &mut self.buri_plac,
            "name_rufname" => &mut self.name_rufname,
            "name_npfx" => &mut self.name_npfx,
            "name_nick" => &mut self.name_nick,
            "name_marnm" => &mut self.name_marnm,
            "sour" => &mut self.sour,
            "reli" => &mut self.reli,
            "family_1" => &mut self.family_1,
            "family_2" => &mut self.family_2,
            _ => return false,
        };
        *slot = value;
        true
    }

    /// Normalizes enumerated attributes and rejects values outside their
    /// domain. `known_families` holds the lowercase family-tree keys.
    pub fn validate(&mut self, known_families: &[String]) -> Result<(), String> {
        if let Some(raw) = self.sex.as_deref() {
            let sex = Sex::parse(raw).ok_or_else(|| format!("invalid sex '{raw}'"))?;
            self.sex = Some(sex.as_str().to_string());
        }
        for family in [&mut self.family_1, &mut self.family_2] {
            if let Some(raw) = family.as_deref() {
                let normalized = raw.to_lowercase();
                if !known_families.contains(&normalized) {
                    return Err(format!("unknown family tree '{raw}'"));
                }
                *family = Some(normalized);
            }
        }
        Ok(())
    }

    pub fn display_name(&self) -> String {
        derive_name(
            self.name_npfx.as_deref(),
            self.givn.as_deref(),
            self.name_nick.as_deref(),
            self.surn.as_deref(),
        )
    }

    pub fn into_row(
        self,
        id: Uuid,
        refn: String,
        confidential: Confidentiality,
        created_by: Option<Uuid>,
        last_modified_by: Option<Uuid>,
    ) -> PersonRow {
        let name = self.display_name();
        PersonRow {
            id,
            refn,
            name,
            birth_date_formatted: parse_date(self.birt_date.as_deref()),
            death_date_formatted: parse_date(self.deat_date.as_deref()),
            uid: self.uid,
            surn: self.surn,
            givn: self.givn,
            sex: self.sex,
            occu: self.occu,
            chan_date: self.chan_date,
            chan_date_time: self.chan_date_time,
            birt_date: self.birt_date,
            birt_plac: self.birt_plac,
            deat_date: self.deat_date,
            deat_plac: self.deat_plac,
            note: self.note,
            chr_date: self.chr_date,
            chr_plac: self.chr_plac,
            chr_addr: self.chr_addr,
            buri_date: self.buri_date,
            buri_plac: self.buri_plac,
            name_rufname: self.name_rufname,
            name_npfx: self.name_npfx,
            name_nick: self.name_nick,
            name_marnm: self.name_marnm,
            sour: self.sour,
            reli: self.reli,
            confidential: confidential.as_str().to_string(),
            family_1: self.family_1,
            family_2: self.family_2,
            created_by,
            last_modified_by,
            updated_at: Utc::now().naive_utc(),
        }
    }
}

/// `npfx givn 'nick' surn`, skipping empty parts.
pub fn derive_name(
    npfx: Option<&str>,
    givn: Option<&str>,
    nick: Option<&str>,
    surn: Option<&str>,
) -> String {
    let nick = nick
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(|value| format!("'{value}'"));
    let parts: Vec<&str> = [npfx, givn, nick.as_deref(), surn]
        .into_iter()
        .flatten()
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .collect();

    if parts.is_empty() {
        UNKNOWN_NAME.to_string()
    } else {
        parts.join(" ")
    }
}

pub fn parse_date(value: Option<&str>) -> Option<NaiveDate> {
    let value = value?.trim();
    NaiveDate::parse_from_str(value, DATE_FORMAT).ok()
}

fn refn_number(refn: &str) -> Option<u64> {
    refn.strip_prefix("@I")?.strip_suffix('@')?.parse().ok()
}

pub fn next_refn<'a>(existing: impl IntoIterator<Item = &'a str>) -> String {
    let max = existing.into_iter().filter_map(refn_number).max().unwrap_or(0);
    format!("@I{}@", max + 1)
}

pub fn generate_refn(conn: &mut PgConnection) -> QueryResult<String> {
    let refns: Vec<String> = persons::table
        .filter(persons::refn.like("@I%@"))
        .select(persons::refn)
        .load(conn)?;
    Ok(next_refn(refns.iter().map(String::as_str)))
}

/// Persists a new person, generating a refn when none is given.
pub fn insert_person(
    conn: &mut PgConnection,
    refn: Option<String>,
    confidential: Confidentiality,
    fields: PersonFields,
    author: Option<Uuid>,
) -> QueryResult<Person> {
    conn.transaction(|conn| {
        let refn = match refn.map(|value| value.trim().to_string()) {
            Some(value) if !value.is_empty() => value,
            _ => generate_refn(conn)?,
        };
        let row = fields.into_row(Uuid::new_v4(), refn, confidential, author, author);
        diesel::insert_into(persons::table)
            .values(&row)
            .execute(conn)?;
        persons::table.find(row.id).first(conn)
    })
}

/// Rewrites every writable column of an existing person, recomputing the
/// derived ones.
pub fn update_person(
    conn: &mut PgConnection,
    existing: &Person,
    refn: String,
    confidential: Confidentiality,
    fields: PersonFields,
    author: Option<Uuid>,
) -> QueryResult<Person> {
    let row = fields.into_row(
        existing.id,
        refn,
        confidential,
        existing.created_by,
        author.or(existing.last_modified_by),
    );
    diesel::update(persons::table.find(existing.id))
        .set(&row)
        .execute(conn)?;
    persons::table.find(existing.id).first(conn)
}

/// Birth dates less than this many years ago mark a living person when no
/// death date is recorded.
pub const LIVING_PERSON_YEARS: i32 = 120;

/// Moves birth and death dates that are not `dd.mm.yyyy` into the note.
/// Returns whether anything changed.
pub fn move_unparsed_dates_to_note(fields: &mut PersonFields) -> bool {
    let mut moved: Vec<String> = Vec::new();
    for (label, slot) in [
        ("Geburtsdatum", &mut fields.birt_date),
        ("Todesdatum", &mut fields.deat_date),
    ] {
        if let Some(raw) = slot.take() {
            if parse_date(Some(&raw)).is_some() {
                *slot = Some(raw);
            } else {
                moved.push(format!("{label}: {raw}"));
            }
        }
    }
    if moved.is_empty() {
        return false;
    }
    let note = fields.note.take().unwrap_or_default();
    let mut lines: Vec<String> = note
        .lines()
        .map(str::to_string)
        .filter(|line| !line.trim().is_empty())
        .collect();
    lines.extend(moved);
    fields.note = Some(lines.join("\n"));
    true
}

/// Persons born within [`LIVING_PERSON_YEARS`] of `current_year` without a
/// recorded death are restricted.
pub fn presumed_living(fields: &PersonFields, current_year: i32) -> bool {
    let born = match parse_date(fields.birt_date.as_deref()) {
        Some(date) => date,
        None => return false,
    };
    let died = fields
        .deat_date
        .as_deref()
        .map(str::trim)
        .is_some_and(|value| !value.is_empty());
    !died && current_year - chrono::Datelike::year(&born) < LIVING_PERSON_YEARS
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn name_is_built_from_prefix_given_nick_and_surname() {
        assert_eq!(
            derive_name(Some("Dr."), Some("Johann"), Some("Hans"), Some("Kempe")),
            "Dr. Johann 'Hans' Kempe"
        );
        assert_eq!(derive_name(None, Some("Anna"), None, Some("Hünten")), "Anna Hünten");
        assert_eq!(derive_name(None, Some("  "), Some(""), Some("Kempe")), "Kempe");
    }

    #[test]
    fn empty_name_falls_back_to_unknown() {
        assert_eq!(derive_name(None, None, None, None), UNKNOWN_NAME);
        assert_eq!(derive_name(Some(""), Some(" "), None, None), UNKNOWN_NAME);
    }

    #[test]
    fn dates_parse_in_day_month_year_format() {
        assert_eq!(
            parse_date(Some("03.10.1921")),
            NaiveDate::from_ymd_opt(1921, 10, 3)
        );
        assert_eq!(parse_date(Some("um 1850")), None);
        assert_eq!(parse_date(Some("1921-10-03")), None);
        assert_eq!(parse_date(Some("31.02.1900")), None);
        assert_eq!(parse_date(None), None);
    }

    #[test]
    fn next_refn_uses_highest_numeric_suffix() {
        let existing = ["@I2@", "@I17@", "@I9@", "custom", "@Ix@"];
        assert_eq!(next_refn(existing), "@I18@");
        assert_eq!(next_refn(Vec::<&str>::new()), "@I1@");
    }

    #[test]
    fn fields_are_assigned_by_column_name() {
        let mut fields = PersonFields::default();
        assert!(fields.set("givn", Some(" Anna ".into())));
        assert!(fields.set("surn", Some("Kempe".into())));
        assert!(fields.set("note", Some("   ".into())));
        assert!(!fields.set("name", Some("ignored".into())));

        assert_eq!(fields.givn.as_deref(), Some("Anna"));
        assert_eq!(fields.note, None);
        assert_eq!(fields.display_name(), "Anna Kempe");
    }

    #[test]
    fn validation_normalizes_sex_and_families() {
        let known = vec!["kempe".to_string(), "huenten".to_string()];
        let mut fields = PersonFields {
            sex: Some("f".into()),
            family_1: Some("Kempe".into()),
            ..Default::default()
        };
        fields.validate(&known).unwrap();
        assert_eq!(fields.sex.as_deref(), Some("F"));
        assert_eq!(fields.family_1.as_deref(), Some("kempe"));

        let mut unknown = PersonFields {
            family_2: Some("meier".into()),
            ..Default::default()
        };
        assert!(unknown.validate(&known).is_err());

        let mut bad_sex = PersonFields {
            sex: Some("X".into()),
            ..Default::default()
        };
        assert!(bad_sex.validate(&known).is_err());
    }

    #[test]
    fn derived_columns_are_computed_for_rows() {
        let fields = PersonFields {
            givn: Some("Karl".into()),
            surn: Some("Kempe".into()),
            birt_date: Some("01.05.1890".into()),
            deat_date: Some("unbekannt".into()),
            ..Default::default()
        };
        let row = fields.into_row(
            Uuid::new_v4(),
            "@I1@".into(),
            Confidentiality::Restricted,
            None,
            None,
        );
        assert_eq!(row.name, "Karl Kempe");
        assert_eq!(row.birth_date_formatted, NaiveDate::from_ymd_opt(1890, 5, 1));
        assert_eq!(row.death_date_formatted, None);
        assert_eq!(row.confidential, "restricted");
    }

    #[test]
    fn unparsed_dates_move_into_the_note() {
        let mut fields = PersonFields {
            birt_date: Some("um 1850".into()),
            deat_date: Some("03.10.1921".into()),
            note: Some("Bauer".into()),
            ..PersonFields::default()
        };
        assert!(move_unparsed_dates_to_note(&mut fields));
        assert_eq!(fields.birt_date, None);
        assert_eq!(fields.deat_date.as_deref(), Some("03.10.1921"));
        assert_eq!(fields.note.as_deref(), Some("Bauer\nGeburtsdatum: um 1850"));
        assert!(!move_unparsed_dates_to_note(&mut fields));
    }

    #[test]
    fn recent_births_without_death_are_presumed_living() {
        let living = PersonFields {
            birt_date: Some("01.01.1950".into()),
            ..PersonFields::default()
        };
        assert!(presumed_living(&living, 2026));

        let died = PersonFields {
            deat_date: Some("vor 2000".into()),
            ..living.clone()
        };
        assert!(!presumed_living(&died, 2026));

        let old = PersonFields {
            birt_date: Some("01.01.1890".into()),
            ..PersonFields::default()
        };
        assert!(!presumed_living(&old, 2026));
        assert!(!presumed_living(&PersonFields::default(), 2026));
    }
}
