use std::collections::{BTreeMap, BTreeSet};

use chrono::Utc;
use diesel::pg::PgConnection;
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::ancestors::person::Sex;
use crate::models::{MarriageRow, NewMarriage, NewMarriageChild, RelationRow};
use crate::schema::{marriage_children, marriages, relations};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FamilyStatus {
    Married,
    NotMarried,
    Widowed,
    Divorced,
}

impl FamilyStatus {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "married" | "verheiratet" => Some(FamilyStatus::Married),
            "not_married" | "nicht verheiratet" | "unverheiratet" => {
                Some(FamilyStatus::NotMarried)
            }
            "widowed" | "verwitwet" => Some(FamilyStatus::Widowed),
            "divorced" | "geschieden" => Some(FamilyStatus::Divorced),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FamilyStatus::Married => "married",
            FamilyStatus::NotMarried => "not_married",
            FamilyStatus::Widowed => "widowed",
            FamilyStatus::Divorced => "divorced",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MarriageInput {
    pub spouse_id: Option<Uuid>,
    pub marriage_date: Option<String>,
    pub marriage_place: Option<String>,
    pub family_status: Option<FamilyStatus>,
    pub children: Vec<Uuid>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RelationInput {
    pub father_id: Option<Uuid>,
    pub mother_id: Option<Uuid>,
    pub marriages: Vec<MarriageInput>,
}

impl RelationInput {
    /// Every person the input points at, in input order.
    pub fn referenced(&self) -> Vec<Uuid> {
        let mut ids: Vec<Uuid> = self.father_id.into_iter().chain(self.mother_id).collect();
        for marriage in &self.marriages {
            ids.extend(marriage.spouse_id);
            ids.extend(marriage.children.iter().copied());
        }
        ids
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Marriage {
    pub id: Uuid,
    pub position: i32,
    pub spouse_id: Option<Uuid>,
    pub marriage_date: Option<String>,
    pub marriage_place: Option<String>,
    pub family_status: Option<FamilyStatus>,
    pub children: BTreeSet<Uuid>,
}

impl Marriage {
    fn from_row(row: MarriageRow, children: BTreeSet<Uuid>) -> Self {
        Self {
            id: row.id,
            position: row.position,
            spouse_id: row.spouse_id,
            marriage_date: row.marriage_date,
            marriage_place: row.marriage_place,
            family_status: row.family_status.as_deref().and_then(FamilyStatus::parse),
            children,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RelationRecord {
    pub person_id: Uuid,
    pub father_id: Option<Uuid>,
    pub mother_id: Option<Uuid>,
    pub marriages: Vec<Marriage>,
}

impl RelationRecord {
    pub fn all_children(&self) -> BTreeSet<Uuid> {
        self.marriages
            .iter()
            .flat_map(|marriage| marriage.children.iter().copied())
            .collect()
    }

    pub fn spouses(&self) -> BTreeSet<Uuid> {
        self.marriages
            .iter()
            .filter_map(|marriage| marriage.spouse_id)
            .collect()
    }

    pub fn next_position(&self) -> i32 {
        self.marriages
            .iter()
            .map(|marriage| marriage.position)
            .max()
            .unwrap_or(0)
            + 1
    }
}

/// Where a marriage record pointing at a given spouse goes in someone's
/// ordered marriage list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarriageSlot {
    /// An existing marriage already points at the spouse.
    Matching(usize),
    /// The first marriage without a spouse can be reused.
    Free(usize),
    Append,
}

pub fn choose_marriage_slot(marriages: &[Marriage], spouse: Option<Uuid>) -> MarriageSlot {
    if let Some(spouse) = spouse {
        if let Some(index) = marriages
            .iter()
            .position(|marriage| marriage.spouse_id == Some(spouse))
        {
            return MarriageSlot::Matching(index);
        }
    }
    match marriages
        .iter()
        .position(|marriage| marriage.spouse_id.is_none())
    {
        Some(index) => MarriageSlot::Free(index),
        None => MarriageSlot::Append,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParentRole {
    Father,
    Mother,
}

/// Which parent pointer of a child should reference `parent`. Sex decides
/// when known; otherwise an existing pointer is kept, then the first free
/// pointer is used, and the father pointer is the last resort.
pub fn parent_role(
    sex: Option<Sex>,
    father: Option<Uuid>,
    mother: Option<Uuid>,
    parent: Uuid,
) -> ParentRole {
    match sex {
        Some(Sex::Female) => ParentRole::Mother,
        Some(Sex::Male) => ParentRole::Father,
        _ if father == Some(parent) => ParentRole::Father,
        _ if mother == Some(parent) => ParentRole::Mother,
        _ if father.is_none() => ParentRole::Father,
        _ if mother.is_none() => ParentRole::Mother,
        _ => ParentRole::Father,
    }
}

pub fn load_relation(
    conn: &mut PgConnection,
    person_id: Uuid,
) -> QueryResult<Option<RelationRecord>> {
    let row: Option<RelationRow> = relations::table
        .find(person_id)
        .select(RelationRow::as_select())
        .first(conn)
        .optional()?;
    match row {
        Some(row) => {
            let mut records = assemble(conn, vec![row])?;
            Ok(records.pop())
        }
        None => Ok(None),
    }
}

pub fn load_relations(
    conn: &mut PgConnection,
    person_ids: &[Uuid],
) -> QueryResult<Vec<RelationRecord>> {
    let rows: Vec<RelationRow> = relations::table
        .filter(relations::person_id.eq_any(person_ids))
        .select(RelationRow::as_select())
        .load(conn)?;
    assemble(conn, rows)
}

fn assemble(conn: &mut PgConnection, rows: Vec<RelationRow>) -> QueryResult<Vec<RelationRecord>> {
    let owner_ids: Vec<Uuid> = rows.iter().map(|row| row.person_id).collect();
    let marriage_rows: Vec<MarriageRow> = marriages::table
        .filter(marriages::person_id.eq_any(&owner_ids))
        .order((marriages::person_id.asc(), marriages::position.asc()))
        .select(MarriageRow::as_select())
        .load(conn)?;
    let marriage_ids: Vec<Uuid> = marriage_rows.iter().map(|row| row.id).collect();
    let child_rows: Vec<(Uuid, Uuid)> = marriage_children::table
        .filter(marriage_children::marriage_id.eq_any(&marriage_ids))
        .select((marriage_children::marriage_id, marriage_children::child_id))
        .load(conn)?;

    let mut children: BTreeMap<Uuid, BTreeSet<Uuid>> = BTreeMap::new();
    for (marriage_id, child_id) in child_rows {
        children.entry(marriage_id).or_default().insert(child_id);
    }

    let mut by_owner: BTreeMap<Uuid, Vec<Marriage>> = BTreeMap::new();
    for row in marriage_rows {
        let kids = children.remove(&row.id).unwrap_or_default();
        by_owner
            .entry(row.person_id)
            .or_default()
            .push(Marriage::from_row(row, kids));
    }

    Ok(rows
        .into_iter()
        .map(|row| RelationRecord {
            person_id: row.person_id,
            father_id: row.father_id,
            mother_id: row.mother_id,
            marriages: by_owner.remove(&row.person_id).unwrap_or_default(),
        })
        .collect())
}

pub fn ensure_relation(conn: &mut PgConnection, person_id: Uuid) -> QueryResult<()> {
    diesel::insert_into(relations::table)
        .values(relations::person_id.eq(person_id))
        .on_conflict_do_nothing()
        .execute(conn)?;
    Ok(())
}

pub fn set_parents(
    conn: &mut PgConnection,
    person_id: Uuid,
    father_id: Option<Uuid>,
    mother_id: Option<Uuid>,
) -> QueryResult<()> {
    diesel::update(relations::table.find(person_id))
        .set((
            relations::father_id.eq(father_id),
            relations::mother_id.eq(mother_id),
            relations::updated_at.eq(Utc::now().naive_utc()),
        ))
        .execute(conn)?;
    Ok(())
}

pub fn clear_parent(
    conn: &mut PgConnection,
    child_id: Uuid,
    parent_id: Uuid,
) -> QueryResult<bool> {
    let now = Utc::now().naive_utc();
    let fathers = diesel::update(
        relations::table
            .filter(relations::person_id.eq(child_id))
            .filter(relations::father_id.eq(parent_id)),
    )
    .set((
        relations::father_id.eq(None::<Uuid>),
        relations::updated_at.eq(now),
    ))
    .execute(conn)?;
    let mothers = diesel::update(
        relations::table
            .filter(relations::person_id.eq(child_id))
            .filter(relations::mother_id.eq(parent_id)),
    )
    .set((
        relations::mother_id.eq(None::<Uuid>),
        relations::updated_at.eq(now),
    ))
    .execute(conn)?;
    Ok(fathers + mothers > 0)
}

/// Replaces the ordered marriage list of `person_id` with `inputs`,
/// numbering positions from 1.
pub fn replace_marriages(
    conn: &mut PgConnection,
    person_id: Uuid,
    inputs: &[MarriageInput],
) -> QueryResult<()> {
    diesel::delete(marriages::table.filter(marriages::person_id.eq(person_id))).execute(conn)?;
    for (index, input) in inputs.iter().enumerate() {
        let marriage_id = insert_marriage(
            conn,
            person_id,
            index as i32 + 1,
            input.spouse_id,
            input.marriage_date.clone(),
            input.marriage_place.clone(),
            input.family_status,
        )?;
        let children: BTreeSet<Uuid> = input.children.iter().copied().collect();
        set_children(conn, marriage_id, &children)?;
    }
    Ok(())
}

pub fn insert_marriage(
    conn: &mut PgConnection,
    person_id: Uuid,
    position: i32,
    spouse_id: Option<Uuid>,
    marriage_date: Option<String>,
    marriage_place: Option<String>,
    family_status: Option<FamilyStatus>,
) -> QueryResult<Uuid> {
    let marriage = NewMarriage {
        id: Uuid::new_v4(),
        person_id,
        position,
        spouse_id,
        marriage_date,
        marriage_place,
        family_status: family_status.map(|status| status.as_str().to_string()),
    };
    diesel::insert_into(marriages::table)
        .values(&marriage)
        .execute(conn)?;
    Ok(marriage.id)
}

pub fn update_marriage(
    conn: &mut PgConnection,
    marriage_id: Uuid,
    spouse_id: Option<Uuid>,
    marriage_date: Option<String>,
    marriage_place: Option<String>,
    family_status: Option<FamilyStatus>,
) -> QueryResult<()> {
    diesel::update(marriages::table.find(marriage_id))
        .set((
            marriages::spouse_id.eq(spouse_id),
            marriages::marriage_date.eq(marriage_date),
            marriages::marriage_place.eq(marriage_place),
            marriages::family_status.eq(family_status.map(|status| status.as_str().to_string())),
        ))
        .execute(conn)?;
    Ok(())
}

pub fn release_spouse(
    conn: &mut PgConnection,
    owner_id: Uuid,
    spouse_id: Uuid,
) -> QueryResult<usize> {
    diesel::update(
        marriages::table
            .filter(marriages::person_id.eq(owner_id))
            .filter(marriages::spouse_id.eq(spouse_id)),
    )
    .set(marriages::spouse_id.eq(None::<Uuid>))
    .execute(conn)
}

pub fn set_children(
    conn: &mut PgConnection,
    marriage_id: Uuid,
    children: &BTreeSet<Uuid>,
) -> QueryResult<()> {
    diesel::delete(marriage_children::table.filter(marriage_children::marriage_id.eq(marriage_id)))
        .execute(conn)?;
    let rows: Vec<NewMarriageChild> = children
        .iter()
        .map(|child_id| NewMarriageChild {
            marriage_id,
            child_id: *child_id,
        })
        .collect();
    if !rows.is_empty() {
        diesel::insert_into(marriage_children::table)
            .values(&rows)
            .execute(conn)?;
    }
    Ok(())
}

pub fn add_children(
    conn: &mut PgConnection,
    marriage_id: Uuid,
    children: &BTreeSet<Uuid>,
) -> QueryResult<()> {
    let rows: Vec<NewMarriageChild> = children
        .iter()
        .map(|child_id| NewMarriageChild {
            marriage_id,
            child_id: *child_id,
        })
        .collect();
    if !rows.is_empty() {
        diesel::insert_into(marriage_children::table)
            .values(&rows)
            .on_conflict_do_nothing()
            .execute(conn)?;
    }
    Ok(())
}

/// Removes `child_id` from every marriage of `owner_id` except `keep`.
pub fn detach_child(
    conn: &mut PgConnection,
    owner_id: Uuid,
    child_id: Uuid,
    keep: Option<Uuid>,
) -> QueryResult<usize> {
    let mut owned = marriages::table
        .filter(marriages::person_id.eq(owner_id))
        .select(marriages::id)
        .into_boxed();
    if let Some(keep) = keep {
        owned = owned.filter(marriages::id.ne(keep));
    }
    let marriage_ids: Vec<Uuid> = owned.load(conn)?;
    if marriage_ids.is_empty() {
        return Ok(0);
    }
    diesel::delete(
        marriage_children::table
            .filter(marriage_children::marriage_id.eq_any(marriage_ids))
            .filter(marriage_children::child_id.eq(child_id)),
    )
    .execute(conn)
}

pub fn delete_relation(conn: &mut PgConnection, person_id: Uuid) -> QueryResult<usize> {
    diesel::delete(relations::table.find(person_id)).execute(conn)
}
