//! Integration tests running the custom fields context over SQLite

use custom_fields::{
    CustomFieldsConfig, CustomFieldsContext, FieldDraft, FieldId, FieldPatch, FieldType,
    FieldValue, FieldsError, OwnerRef, Submission,
};
use custom_fields_sqlite::SqliteStore;
use serde_json::json;
use tempfile::TempDir;

fn open(temp: &TempDir) -> CustomFieldsContext {
    let config = CustomFieldsConfig::default();
    let store = SqliteStore::open(temp.path().join("fields.db"), &config).unwrap();
    CustomFieldsContext::open(store)
        .with_config(config)
        .build()
        .unwrap()
}

fn survey() -> OwnerRef {
    OwnerRef::new("survey", "1")
}

async fn orders(ctx: &CustomFieldsContext, ids: &[FieldId]) -> Vec<u32> {
    let mut out = Vec::new();
    for id in ids {
        out.push(ctx.field(*id).await.unwrap().order);
    }
    out
}

#[tokio::test]
async fn test_ordering_and_rejections() {
    let temp = TempDir::new().unwrap();
    let ctx = open(&temp);
    let fields = ctx.owner(survey());

    let mut ids = Vec::new();
    for title in ["one", "two", "three"] {
        ids.push(
            fields
                .create_field(FieldDraft::new(FieldType::Text, title))
                .await
                .unwrap()
                .id,
        );
    }
    assert_eq!(orders(&ctx, &ids).await, vec![1, 2, 3]);

    fields.order(&[ids[2], ids[0], ids[1]], None).await.unwrap();
    assert_eq!(orders(&ctx, &ids).await, vec![2, 3, 1]);

    let err = fields.order(&[ids[0], ids[1]], None).await.unwrap_err();
    assert!(matches!(
        err,
        FieldsError::WrongNumberOfFieldsForOrdering { .. }
    ));
    let err = fields
        .order(&[ids[0], ids[0], ids[1]], None)
        .await
        .unwrap_err();
    assert!(matches!(err, FieldsError::DuplicateFieldInOrdering { .. }));
    assert_eq!(orders(&ctx, &ids).await, vec![2, 3, 1]);
}

#[tokio::test]
async fn test_archive_and_values_persist_across_reopen() {
    let temp = TempDir::new().unwrap();
    let (colour, toppings) = {
        let ctx = open(&temp);
        let fields = ctx.owner(survey());
        let colour = fields
            .create_field(
                FieldDraft::new(FieldType::Select, "Colour")
                    .with_options(["red", "blue"])
                    .required(true),
            )
            .await
            .unwrap();
        let toppings = fields
            .create_field(
                FieldDraft::new(FieldType::Multiselect, "Toppings").with_options(["a", "b"]),
            )
            .await
            .unwrap();

        let report = fields
            .save_custom_fields(&Submission::from([
                (colour.id, json!("blue")),
                (toppings.id, json!(["a", "b"])),
            ]))
            .await
            .unwrap();
        assert!(report.passes());
        ctx.archive(toppings.id).await.unwrap();
        (colour.id, toppings.id)
    };

    let ctx = open(&temp);
    let fields = ctx.owner(survey());
    let active: Vec<FieldId> = fields
        .custom_fields(None, false)
        .await
        .unwrap()
        .iter()
        .map(|f| f.id)
        .collect();
    assert_eq!(active, vec![colour]);

    assert_eq!(
        ctx.values(colour).await.unwrap(),
        Some(FieldValue::One(json!("blue")))
    );
    assert_eq!(
        ctx.values(toppings).await.unwrap(),
        Some(FieldValue::Many(vec![json!("a"), json!("b")]))
    );

    let next = fields
        .create_field(FieldDraft::new(FieldType::Text, "Notes"))
        .await
        .unwrap();
    assert_eq!(next.order, 3);
}

#[test_log::test(tokio::test)]
async fn test_concurrent_creates_get_unique_orders() {
    let temp = TempDir::new().unwrap();
    let ctx = open(&temp);

    let mut handles = Vec::new();
    for n in 0..8 {
        let ctx = ctx.clone();
        handles.push(tokio::spawn(async move {
            ctx.owner(survey())
                .create_field(FieldDraft::new(FieldType::Text, format!("q{n}")))
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
    assert_eq!(orders, (1..=8).collect::<Vec<u32>>());
}

#[tokio::test]
async fn test_reorder_with_archived_field_persists() {
    let temp = TempDir::new().unwrap();
    let ids = {
        let ctx = open(&temp);
        let fields = ctx.owner(survey());
        let mut ids = Vec::new();
        for title in ["one", "two", "three"] {
            ids.push(
                fields
                    .create_field(FieldDraft::new(FieldType::Text, title))
                    .await
                    .unwrap()
                    .id,
            );
        }
        ctx.archive(ids[1]).await.unwrap();

        let err = fields.order(&[ids[2], ids[1]], None).await.unwrap_err();
        assert!(matches!(
            err,
            FieldsError::FieldDoesNotBelongToModel { field_id, .. } if field_id == ids[1]
        ));
        fields.order(&[ids[2], ids[0]], None).await.unwrap();
        ids
    };

    let ctx = open(&temp);
    assert_eq!(orders(&ctx, &ids).await, vec![2, 3, 1]);
    let restored = ctx.unarchive(ids[1]).await.unwrap();
    assert_eq!(restored.order, 3);

    let next = ctx
        .owner(survey())
        .create_field(FieldDraft::new(FieldType::Text, "four"))
        .await
        .unwrap();
    assert_eq!(next.order, 4);
}

#[tokio::test]
async fn test_type_locked_after_responses() {
    let temp = TempDir::new().unwrap();
    let ctx = open(&temp);
    let fields = ctx.owner(survey());
    let age = fields
        .create_field(FieldDraft::new(FieldType::Text, "Age"))
        .await
        .unwrap();

    ctx.update_field(age.id, &FieldPatch::new().with_type(FieldType::Number))
        .await
        .unwrap();
    fields
        .save_custom_fields(&Submission::from([(age.id, json!(30))]))
        .await
        .unwrap();

    let err = ctx
        .update_field(age.id, &FieldPatch::new().with_type(FieldType::Text))
        .await
        .unwrap_err();
    assert!(matches!(err, FieldsError::TypeLocked { .. }));
    assert_eq!(ctx.field(age.id).await.unwrap().field_type, FieldType::Number);
}
