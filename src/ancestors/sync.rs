//! Keeps relation records consistent across a family.
//!
//! Saving one person's relation mirrors each marriage onto the spouse,
//! points every child back at its parents and registers the person as a
//! child in the parents' marriages. A [`PropagationContext`] travels through
//! the cascade so each link is written once per save.

use std::collections::{BTreeSet, HashSet};

use diesel::pg::PgConnection;
use diesel::prelude::*;
use serde::Serialize;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::ancestors::person::Sex;
use crate::ancestors::relation::{
    self, choose_marriage_slot, parent_role, FamilyStatus, MarriageInput, MarriageSlot,
    ParentRole, RelationInput, RelationRecord,
};
use crate::schema::persons;

#[derive(Debug, Default)]
pub struct PropagationContext {
    mirrored: HashSet<(Uuid, Uuid)>,
    parent_links: HashSet<(Uuid, Uuid)>,
    registrations: HashSet<(Uuid, Uuid)>,
    touched: BTreeSet<Uuid>,
}

impl PropagationContext {
    fn touch(&mut self, person_id: Uuid) {
        self.touched.insert(person_id);
    }

    pub fn into_report(self, person_id: Uuid) -> PropagationReport {
        PropagationReport {
            person_id,
            touched: self.touched.into_iter().collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PropagationReport {
    pub person_id: Uuid,
    pub touched: Vec<Uuid>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ChildMerge {
    Replace,
    Union,
}

#[derive(Debug, Clone, Default)]
struct MarriageFacts {
    date: Option<String>,
    place: Option<String>,
    status: Option<FamilyStatus>,
}

/// Replaces the relation of `person_id` with `input` and propagates the
/// change to spouses, children and parents in one transaction.
pub fn save_relation(
    conn: &mut PgConnection,
    person_id: Uuid,
    input: RelationInput,
) -> QueryResult<PropagationReport> {
    conn.transaction(|conn| {
        let sex: Option<String> = persons::table
            .find(person_id)
            .select(persons::sex)
            .first(conn)?;
        let sex = sex.as_deref().and_then(Sex::parse);

        let input = sanitize(conn, person_id, input)?;
        let previous = relation::load_relation(conn, person_id)?;
        let mut ctx = PropagationContext::default();

        relation::ensure_relation(conn, person_id)?;
        relation::set_parents(conn, person_id, input.father_id, input.mother_id)?;
        relation::replace_marriages(conn, person_id, &input.marriages)?;
        ctx.touch(person_id);

        // Children dropped from a marriage, paired with that marriage's spouse.
        let mut dropped: Vec<(Uuid, Uuid)> = Vec::new();
        if let Some(previous) = &previous {
            let children: BTreeSet<Uuid> = input
                .marriages
                .iter()
                .flat_map(|marriage| marriage.children.iter().copied())
                .collect();
            for removed in previous.all_children().difference(&children) {
                if relation::clear_parent(conn, *removed, person_id)? {
                    ctx.touch(*removed);
                }
                dropped.extend(
                    previous
                        .marriages
                        .iter()
                        .filter(|marriage| marriage.children.contains(removed))
                        .filter_map(|marriage| marriage.spouse_id)
                        .map(|spouse| (*removed, spouse)),
                );
            }

            let spouses: BTreeSet<Uuid> = input
                .marriages
                .iter()
                .filter_map(|marriage| marriage.spouse_id)
                .collect();
            for removed in previous.spouses().difference(&spouses) {
                if relation::release_spouse(conn, *removed, person_id)? > 0 {
                    ctx.touch(*removed);
                }
            }

            for (old, new) in [
                (previous.father_id, input.father_id),
                (previous.mother_id, input.mother_id),
            ] {
                if let Some(old) = old.filter(|old| Some(*old) != new) {
                    if relation::detach_child(conn, old, person_id, None)? > 0 {
                        ctx.touch(old);
                    }
                }
            }
        }

        for marriage in &input.marriages {
            let children: BTreeSet<Uuid> = marriage.children.iter().copied().collect();
            if let Some(spouse) = marriage.spouse_id {
                let facts = MarriageFacts {
                    date: marriage.marriage_date.clone(),
                    place: marriage.marriage_place.clone(),
                    status: marriage.family_status,
                };
                mirror_marriage(
                    conn,
                    &mut ctx,
                    person_id,
                    spouse,
                    &facts,
                    &children,
                    ChildMerge::Replace,
                )?;
            }
            for child in &children {
                link_child(conn, &mut ctx, person_id, sex, marriage.spouse_id, *child)?;
            }
        }

        for (child, spouse) in dropped {
            release_child(conn, &mut ctx, spouse, child)?;
        }

        register_with_parents(conn, &mut ctx, person_id, input.father_id, input.mother_id)?;

        let report = ctx.into_report(person_id);
        debug!(
            person_id = %person_id,
            touched = report.touched.len(),
            "relation saved"
        );
        Ok(report)
    })
}

/// Drops self references, unknown persons and duplicates from `input`.
/// Children listed under a repeated spouse are merged into the first
/// marriage with that spouse.
pub fn sanitize(
    conn: &mut PgConnection,
    person_id: Uuid,
    input: RelationInput,
) -> QueryResult<RelationInput> {
    let referenced = input.referenced();
    let existing: HashSet<Uuid> = if referenced.is_empty() {
        HashSet::new()
    } else {
        persons::table
            .filter(persons::id.eq_any(&referenced))
            .select(persons::id)
            .load::<Uuid>(conn)?
            .into_iter()
            .collect()
    };

    let keep = |candidate: Option<Uuid>, role: &str| -> Option<Uuid> {
        let id = candidate?;
        if id == person_id {
            warn!(person_id = %person_id, role, "ignoring self reference in relation");
            return None;
        }
        if !existing.contains(&id) {
            warn!(
                person_id = %person_id,
                referenced = %id,
                role,
                "ignoring unknown person in relation"
            );
            return None;
        }
        Some(id)
    };

    let father_id = keep(input.father_id, "father");
    let mut mother_id = keep(input.mother_id, "mother");
    if mother_id.is_some() && mother_id == father_id {
        warn!(person_id = %person_id, "father and mother are the same person, dropping mother");
        mother_id = None;
    }

    let mut marriages: Vec<MarriageInput> = Vec::with_capacity(input.marriages.len());
    let mut seen_children: HashSet<Uuid> = HashSet::new();
    for marriage in input.marriages {
        let spouse_id = keep(marriage.spouse_id, "spouse");
        let children: Vec<Uuid> = marriage
            .children
            .into_iter()
            .filter_map(|child| keep(Some(child), "child"))
            .filter(|child| Some(*child) != spouse_id)
            .filter(|child| seen_children.insert(*child))
            .collect();

        let duplicate = spouse_id.and_then(|spouse| {
            marriages
                .iter_mut()
                .find(|earlier| earlier.spouse_id == Some(spouse))
        });
        match duplicate {
            Some(earlier) => earlier.children.extend(children),
            None => marriages.push(MarriageInput {
                spouse_id,
                children,
                ..marriage
            }),
        }
    }

    Ok(RelationInput {
        father_id,
        mother_id,
        marriages,
    })
}

fn mirror_marriage(
    conn: &mut PgConnection,
    ctx: &mut PropagationContext,
    owner: Uuid,
    spouse: Uuid,
    facts: &MarriageFacts,
    children: &BTreeSet<Uuid>,
    merge: ChildMerge,
) -> QueryResult<()> {
    if !ctx.mirrored.insert((owner, spouse)) {
        return Ok(());
    }
    relation::ensure_relation(conn, spouse)?;
    let record = relation::load_relation(conn, spouse)?;
    let marriages = record
        .as_ref()
        .map(|record| record.marriages.as_slice())
        .unwrap_or_default();

    let marriage_id = match choose_marriage_slot(&marriages, Some(owner)) {
        MarriageSlot::Matching(index) | MarriageSlot::Free(index) => {
            let existing = &marriages[index];
            let facts = match merge {
                ChildMerge::Replace => facts.clone(),
                ChildMerge::Union => MarriageFacts {
                    date: facts.date.clone().or_else(|| existing.marriage_date.clone()),
                    place: facts.place.clone().or_else(|| existing.marriage_place.clone()),
                    status: facts.status.or(existing.family_status),
                },
            };
            relation::update_marriage(
                conn,
                existing.id,
                Some(owner),
                facts.date,
                facts.place,
                facts.status,
            )?;
            existing.id
        }
        MarriageSlot::Append => {
            let position = record.as_ref().map_or(1, RelationRecord::next_position);
            relation::insert_marriage(
                conn,
                spouse,
                position,
                Some(owner),
                facts.date.clone(),
                facts.place.clone(),
                facts.status,
            )?
        }
    };

    match merge {
        ChildMerge::Replace => relation::set_children(conn, marriage_id, children)?,
        ChildMerge::Union => relation::add_children(conn, marriage_id, children)?,
    }
    ctx.touch(spouse);
    Ok(())
}

/// Clears the pointer of `child` at `parent` once none of the parent's
/// marriages lists the child any more.
fn release_child(
    conn: &mut PgConnection,
    ctx: &mut PropagationContext,
    parent: Uuid,
    child: Uuid,
) -> QueryResult<()> {
    let still_listed = relation::load_relation(conn, parent)?
        .is_some_and(|record| record.all_children().contains(&child));
    if !still_listed && relation::clear_parent(conn, child, parent)? {
        ctx.touch(child);
    }
    Ok(())
}

fn link_child(
    conn: &mut PgConnection,
    ctx: &mut PropagationContext,
    parent: Uuid,
    parent_sex: Option<Sex>,
    other_parent: Option<Uuid>,
    child: Uuid,
) -> QueryResult<()> {
    if !ctx.parent_links.insert((parent, child)) {
        return Ok(());
    }
    relation::ensure_relation(conn, child)?;
    let Some(current) = relation::load_relation(conn, child)? else {
        return Ok(());
    };

    let (father, mother) =
        match parent_role(parent_sex, current.father_id, current.mother_id, parent) {
            ParentRole::Father => (
                Some(parent),
                other_parent.or(current.mother_id.filter(|id| *id != parent)),
            ),
            ParentRole::Mother => (
                other_parent.or(current.father_id.filter(|id| *id != parent)),
                Some(parent),
            ),
        };

    if (father, mother) == (current.father_id, current.mother_id) {
        return Ok(());
    }
    for old in [current.father_id, current.mother_id].into_iter().flatten() {
        if Some(old) != father && Some(old) != mother {
            relation::detach_child(conn, old, child, None)?;
            ctx.touch(old);
        }
    }
    relation::set_parents(conn, child, father, mother)?;
    ctx.touch(child);
    Ok(())
}

fn register_with_parents(
    conn: &mut PgConnection,
    ctx: &mut PropagationContext,
    person_id: Uuid,
    father: Option<Uuid>,
    mother: Option<Uuid>,
) -> QueryResult<()> {
    for (parent, other) in [(father, mother), (mother, father)] {
        let Some(parent) = parent else {
            continue;
        };
        if !ctx.registrations.insert((parent, person_id)) {
            continue;
        }
        relation::ensure_relation(conn, parent)?;
        let record = relation::load_relation(conn, parent)?;
        let marriages = record
            .as_ref()
            .map(|record| record.marriages.as_slice())
            .unwrap_or_default();

        let (marriage_id, facts) = match choose_marriage_slot(&marriages, other) {
            MarriageSlot::Matching(index) | MarriageSlot::Free(index) => {
                let existing = &marriages[index];
                let facts = MarriageFacts {
                    date: existing.marriage_date.clone(),
                    place: existing.marriage_place.clone(),
                    status: existing.family_status,
                };
                if existing.spouse_id != other {
                    relation::update_marriage(
                        conn,
                        existing.id,
                        other,
                        facts.date.clone(),
                        facts.place.clone(),
                        facts.status,
                    )?;
                }
                (existing.id, facts)
            }
            MarriageSlot::Append => {
                let position = record.as_ref().map_or(1, RelationRecord::next_position);
                let id =
                    relation::insert_marriage(conn, parent, position, other, None, None, None)?;
                (id, MarriageFacts::default())
            }
        };

        relation::add_children(conn, marriage_id, &BTreeSet::from([person_id]))?;
        relation::detach_child(conn, parent, person_id, Some(marriage_id))?;
        ctx.touch(parent);

        if let Some(other) = other {
            let children = relation::load_relation(conn, parent)?
                .and_then(|record| {
                    record
                        .marriages
                        .into_iter()
                        .find(|marriage| marriage.id == marriage_id)
                })
                .map(|marriage| marriage.children)
                .unwrap_or_default();
            mirror_marriage(
                conn,
                ctx,
                parent,
                other,
                &facts,
                &children,
                ChildMerge::Union,
            )?;
        }
    }
    Ok(())
}
