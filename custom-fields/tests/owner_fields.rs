//! Integration tests for owner-scoped custom field operations

use std::sync::Arc;

use custom_fields::{
    CustomFieldsConfig, CustomFieldsContext, FieldDefaults, FieldDraft, FieldId, FieldPatch,
    FieldType, FieldValue, FieldsError, HasCustomFields, MemoryStore, OwnerRef, Submission,
};
use serde_json::{json, Value};

struct Event {
    id: u32,
}

impl HasCustomFields for Event {
    const OWNER_KIND: &'static str = "event";

    fn owner_id(&self) -> String {
        self.id.to_string()
    }
}

fn context() -> CustomFieldsContext {
    CustomFieldsContext::open(MemoryStore::new()).build().unwrap()
}

fn text(title: &str) -> FieldDraft {
    FieldDraft::new(FieldType::Text, title)
}

fn submission<const N: usize>(entries: [(FieldId, Value); N]) -> Submission {
    Submission::from(entries)
}

async fn orders(ctx: &CustomFieldsContext, ids: &[FieldId]) -> Vec<u32> {
    let mut out = Vec::new();
    for id in ids {
        out.push(ctx.field(*id).await.unwrap().order);
    }
    out
}

async fn create_three(ctx: &CustomFieldsContext, event: &Event) -> Vec<FieldId> {
    let fields = ctx.for_model(event);
    let mut ids = Vec::new();
    for title in ["first", "second", "third"] {
        ids.push(fields.create_field(text(title)).await.unwrap().id);
    }
    ids
}

#[tokio::test]
async fn test_orders_are_sequential_per_group() {
    let ctx = context();
    let event = Event { id: 1 };
    let fields = ctx.for_model(&event);

    let ids = create_three(&ctx, &event).await;
    assert_eq!(orders(&ctx, &ids).await, vec![1, 2, 3]);

    let grouped = fields
        .create_field(text("diet").in_group("catering"))
        .await
        .unwrap();
    assert_eq!(grouped.order, 1);
    assert_eq!(grouped.group.as_deref(), Some("catering"));

    let blank_group = fields.create_field(text("fourth").in_group("  ")).await.unwrap();
    assert_eq!(blank_group.group, None);
    assert_eq!(blank_group.order, 4);
}

#[tokio::test]
async fn test_reorder_assigns_positions() {
    let ctx = context();
    let event = Event { id: 1 };
    let ids = create_three(&ctx, &event).await;

    ctx.for_model(&event)
        .order(&[ids[2], ids[0], ids[1]], None)
        .await
        .unwrap();

    assert_eq!(orders(&ctx, &ids).await, vec![2, 3, 1]);
    let listed: Vec<FieldId> = ctx
        .for_model(&event)
        .custom_fields(None, false)
        .await
        .unwrap()
        .iter()
        .map(|f| f.id)
        .collect();
    assert_eq!(listed, vec![ids[2], ids[0], ids[1]]);
}

#[tokio::test]
async fn test_rejected_reorders_leave_orders_unchanged() {
    let ctx = context();
    let event = Event { id: 1 };
    let ids = create_three(&ctx, &event).await;
    let foreign = ctx
        .for_model(&Event { id: 2 })
        .create_field(text("other"))
        .await
        .unwrap();
    let fields = ctx.for_model(&event);

    let subset = fields.order(&[ids[0], ids[1]], None).await.unwrap_err();
    assert!(matches!(
        subset,
        FieldsError::WrongNumberOfFieldsForOrdering {
            expected: 3,
            actual: 2
        }
    ));

    let superset = fields
        .order(&[ids[0], ids[1], ids[2], foreign.id], None)
        .await
        .unwrap_err();
    assert!(matches!(
        superset,
        FieldsError::WrongNumberOfFieldsForOrdering { .. }
    ));

    let with_foreign = fields
        .order(&[ids[0], ids[1], foreign.id], None)
        .await
        .unwrap_err();
    assert!(matches!(
        with_foreign,
        FieldsError::FieldDoesNotBelongToModel { field_id, .. } if field_id == foreign.id
    ));

    let duplicate = fields
        .order(&[ids[0], ids[0], ids[1]], None)
        .await
        .unwrap_err();
    assert!(matches!(
        duplicate,
        FieldsError::DuplicateFieldInOrdering { .. }
    ));

    assert_eq!(orders(&ctx, &ids).await, vec![1, 2, 3]);
}

#[tokio::test]
async fn test_reorder_other_group_is_independent() {
    let ctx = context();
    let event = Event { id: 1 };
    let fields = ctx.for_model(&event);
    let ids = create_three(&ctx, &event).await;
    let a = fields.create_field(text("a").in_group("g")).await.unwrap();
    let b = fields.create_field(text("b").in_group("g")).await.unwrap();

    fields.order(&[b.id, a.id], Some("g")).await.unwrap();

    assert_eq!(orders(&ctx, &[a.id, b.id]).await, vec![2, 1]);
    assert_eq!(orders(&ctx, &ids).await, vec![1, 2, 3]);
}

#[tokio::test]
async fn test_archive_hides_field_and_keeps_responses() {
    let ctx = context();
    let event = Event { id: 1 };
    let fields = ctx.for_model(&event);
    let ids = create_three(&ctx, &event).await;

    fields
        .save_custom_fields(&submission([(ids[1], json!("kept"))]))
        .await
        .unwrap();

    let archived = ctx.archive(ids[1]).await.unwrap();
    assert!(archived.is_archived());

    let active: Vec<FieldId> = fields
        .custom_fields(None, false)
        .await
        .unwrap()
        .iter()
        .map(|f| f.id)
        .collect();
    assert_eq!(active, vec![ids[0], ids[2]]);
    assert_eq!(fields.custom_fields(None, true).await.unwrap().len(), 3);
    assert_eq!(ctx.responses(ids[1]).await.unwrap().len(), 1);

    let err = fields
        .validate_custom_field(ids[1], json!("x"))
        .await
        .unwrap_err();
    assert!(matches!(err, FieldsError::FieldDoesNotBelongToModel { .. }));

    // Only active fields are named; the archived one moves to the end.
    let err = fields
        .order(&[ids[2], ids[0], ids[1]], None)
        .await
        .unwrap_err();
    assert!(err.is_ordering_error());
    let err = fields.order(&[ids[2], ids[1]], None).await.unwrap_err();
    assert!(matches!(
        err,
        FieldsError::FieldDoesNotBelongToModel { field_id, .. } if field_id == ids[1]
    ));
    fields.order(&[ids[2], ids[0]], None).await.unwrap();
    let orders: Vec<(FieldId, u32)> = fields
        .custom_fields(None, true)
        .await
        .unwrap()
        .iter()
        .map(|f| (f.id, f.order))
        .collect();
    assert_eq!(orders, vec![(ids[2], 1), (ids[0], 2), (ids[1], 3)]);

    let restored = ctx.unarchive(ids[1]).await.unwrap();
    assert!(!restored.is_archived());
    assert_eq!(restored.order, 3);
    assert_eq!(fields.custom_fields(None, false).await.unwrap().len(), 3);
}

#[tokio::test]
async fn test_archived_required_field_does_not_block_submission() {
    let ctx = context();
    let event = Event { id: 1 };
    let fields = ctx.for_model(&event);
    let name = fields.create_field(text("Name")).await.unwrap();
    let badge = fields
        .create_field(text("Badge").required(true))
        .await
        .unwrap();

    let report = fields
        .validate_custom_fields(&submission([(name.id, json!("Ada"))]))
        .await
        .unwrap();
    assert!(report.fails());
    assert_eq!(
        report.first_message(badge.id),
        Some("The Badge field is required.")
    );

    ctx.archive(badge.id).await.unwrap();
    let report = fields
        .validate_custom_fields(&submission([(name.id, json!("Ada"))]))
        .await
        .unwrap();
    assert!(report.passes());
}

#[tokio::test]
async fn test_select_end_to_end() {
    let ctx = context();
    let fields = ctx.owner(OwnerRef::new("survey", "9"));
    let colour = fields
        .create_field(
            FieldDraft::new(FieldType::Select, "Colour")
                .with_options(["red", "blue"])
                .required(true),
        )
        .await
        .unwrap();
    assert_eq!(colour.order, 1);

    let report = fields
        .validate_custom_fields(&submission([(colour.id, json!("green"))]))
        .await
        .unwrap();
    assert!(report.fails());
    assert_eq!(
        report.messages_for(colour.id),
        ["The selected Colour is invalid."]
    );

    let report = fields
        .save_custom_fields(&submission([(colour.id, json!("red"))]))
        .await
        .unwrap();
    assert!(report.passes());
    assert_eq!(
        ctx.values(colour.id).await.unwrap(),
        Some(FieldValue::One(json!("red")))
    );
}

#[tokio::test]
async fn test_multiselect_values_are_flattened() {
    let ctx = context();
    let fields = ctx.owner(OwnerRef::new("survey", "9"));
    let toppings = fields
        .create_field(
            FieldDraft::new(FieldType::Multiselect, "Toppings").with_options(["a", "b", "c"]),
        )
        .await
        .unwrap();

    let report = fields
        .save_custom_fields(&submission([(toppings.id, json!(["a", "c"]))]))
        .await
        .unwrap();
    assert!(report.passes());
    assert_eq!(ctx.responses(toppings.id).await.unwrap().len(), 2);
    assert_eq!(
        ctx.values(toppings.id).await.unwrap(),
        Some(FieldValue::Many(vec![json!("a"), json!("c")]))
    );

    let report = fields
        .save_custom_fields(&submission([(toppings.id, json!(["a", "z"]))]))
        .await
        .unwrap();
    assert!(report.fails());
    assert_eq!(ctx.responses(toppings.id).await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_text_value_is_first_response() {
    let ctx = context();
    let fields = ctx.owner(OwnerRef::new("survey", "9"));
    let note = fields.create_field(text("Note")).await.unwrap();

    assert_eq!(ctx.values(note.id).await.unwrap(), None);

    ctx.store().insert_response(note.id, json!("first")).await.unwrap();
    ctx.store().insert_response(note.id, json!("second")).await.unwrap();
    assert_eq!(
        ctx.values(note.id).await.unwrap(),
        Some(FieldValue::One(json!("first")))
    );

    fields
        .save_custom_fields(&submission([(note.id, json!("replaced"))]))
        .await
        .unwrap();
    assert_eq!(
        ctx.values(note.id).await.unwrap(),
        Some(FieldValue::One(json!("replaced")))
    );
}

#[tokio::test]
async fn test_save_rejects_whole_submission_on_any_failure() {
    let ctx = context();
    let fields = ctx.owner(OwnerRef::new("survey", "9"));
    let name = fields.create_field(text("Name")).await.unwrap();
    let email = fields
        .create_field(FieldDraft::new(FieldType::Email, "Email"))
        .await
        .unwrap();

    let report = fields
        .save_custom_fields(&submission([
            (name.id, json!("Ada")),
            (email.id, json!("not-an-email")),
        ]))
        .await
        .unwrap();
    assert_eq!(
        report.first_message(email.id),
        Some("The Email field must be a valid email address.")
    );
    assert!(ctx.responses(name.id).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_submission_for_other_owner_field_is_ignored() {
    let ctx = context();
    let mine = ctx.for_model(&Event { id: 1 });
    let theirs = ctx.for_model(&Event { id: 2 });
    let own = mine.create_field(text("Mine")).await.unwrap();
    let other = theirs.create_field(text("Theirs")).await.unwrap();

    let report = mine
        .save_custom_fields(&submission([
            (own.id, json!("a")),
            (other.id, json!("b")),
        ]))
        .await
        .unwrap();
    assert!(report.passes());
    assert!(!report.validated().contains_key(&other.id));
    assert!(ctx.responses(other.id).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_validate_in_group_only_checks_that_group() {
    let ctx = context();
    let fields = ctx.owner(OwnerRef::new("survey", "9"));
    fields
        .create_field(text("Name").required(true))
        .await
        .unwrap();
    let diet = fields
        .create_field(text("Diet").in_group("catering"))
        .await
        .unwrap();

    let report = fields
        .validate_custom_fields_in(Some("catering"), &submission([(diet.id, json!("vegan"))]))
        .await
        .unwrap();
    assert!(report.passes());

    let report = fields
        .validate_custom_fields(&submission([(diet.id, json!("vegan"))]))
        .await
        .unwrap();
    assert!(report.fails());
}

#[tokio::test]
async fn test_validate_request_uses_configured_form_name() {
    let ctx = CustomFieldsContext::open(MemoryStore::new())
        .with_config(CustomFieldsConfig::default().with_form_name("answers"))
        .build()
        .unwrap();
    let fields = ctx.owner(OwnerRef::new("survey", "9"));
    let age = fields
        .create_field(FieldDraft::new(FieldType::Number, "Age").required(true))
        .await
        .unwrap();

    let body = json!({ "answers": { (age.id.to_string()): "forty" } });
    let report = fields.validate_custom_fields_request(&body).await.unwrap();
    assert_eq!(
        report.first_message(age.id),
        Some("The Age field must be an integer.")
    );

    let body = json!({ "answers": { (age.id.to_string()): 40 } });
    assert!(fields.validate_custom_fields_request(&body).await.unwrap().passes());

    let body = json!({ "custom_fields": { (age.id.to_string()): 40 } });
    let report = fields.validate_custom_fields_request(&body).await.unwrap();
    assert_eq!(
        report.first_message(age.id),
        Some("The Age field is required.")
    );
}

#[tokio::test]
async fn test_checkbox_required_must_be_present() {
    let ctx = context();
    let fields = ctx.owner(OwnerRef::new("survey", "9"));
    let terms = fields
        .create_field(FieldDraft::new(FieldType::Checkbox, "Terms").required(true))
        .await
        .unwrap();

    for (value, passes) in [
        (json!(true), true),
        (json!(false), true),
        (json!("yes"), false),
        (Value::Null, false),
    ] {
        let report = fields
            .validate_custom_field(terms.id, value.clone())
            .await
            .unwrap();
        assert_eq!(report.passes(), passes, "value {value}");
    }
}

#[tokio::test]
async fn test_seed_defaults_is_idempotent() {
    let ctx = context();
    let fields = ctx.owner(OwnerRef::new("event", "3"));
    let defaults = FieldDefaults::from_yaml(
        r#"
fields:
  - type: text
    title: Name
    required: true
  - type: select
    title: T-shirt size
    options: [S, M, L]
    group: merch
"#,
    )
    .unwrap();

    let created = fields.seed_defaults(&defaults).await.unwrap();
    assert_eq!(created.len(), 2);

    ctx.archive(created[0].id).await.unwrap();
    let again = fields.seed_defaults(&defaults).await.unwrap();
    assert!(again.is_empty());
    assert_eq!(fields.all_fields(true).await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_update_field_renormalizes() {
    let ctx = context();
    let fields = ctx.owner(OwnerRef::new("survey", "9"));
    let size = fields
        .create_field(FieldDraft::new(FieldType::Radio, "Size").with_options(["S", "L"]))
        .await
        .unwrap();

    let err = ctx
        .update_field(size.id, &FieldPatch::new().with_options(Vec::<String>::new()))
        .await
        .unwrap_err();
    assert!(matches!(err, FieldsError::InvalidDefinition { .. }));

    let updated = ctx
        .update_field(size.id, &FieldPatch::new().with_type(FieldType::Text))
        .await
        .unwrap();
    assert_eq!(updated.field_type, FieldType::Text);
    assert!(updated.options.is_empty());
    assert_eq!(updated.order, size.order);
}

#[test_log::test(tokio::test)]
async fn test_concurrent_creates_get_unique_orders() {
    let ctx = context();
    let mut handles = Vec::new();
    for n in 0..16 {
        let ctx = ctx.clone();
        handles.push(tokio::spawn(async move {
            ctx.owner(OwnerRef::new("survey", "1"))
                .create_field(text(&format!("q{n}")))
                .await
                .unwrap()
                .order
        }));
    }

    let mut orders = Vec::new();
    for handle in handles {
        orders.push(handle.await.unwrap());
    }
    orders.sort_unstable();
    assert_eq!(orders, (1..=16).collect::<Vec<u32>>());
}

#[tokio::test]
async fn test_shared_store_across_contexts() {
    let store: Arc<dyn custom_fields::FieldStore> = Arc::new(MemoryStore::new());
    let a = CustomFieldsContext::open_shared(store.clone()).build().unwrap();
    let b = CustomFieldsContext::open_shared(store).build().unwrap();

    let field = a
        .owner(OwnerRef::new("survey", "1"))
        .create_field(text("Shared"))
        .await
        .unwrap();
    assert_eq!(b.field(field.id).await.unwrap().title, "Shared");
}
