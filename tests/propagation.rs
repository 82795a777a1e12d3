use plistor::{
    CodecError, Document, DocumentOptions, DuplicateKeyPolicy, EditError, Value, ValueKind, ViewState,
};
use pretty_assertions::assert_eq;
use tempfile::TempDir;

type Result<T> = std::result::Result<T, Box<dyn std::error::Error>>;

fn json_doc(dir: &TempDir, json: &str, options: DocumentOptions) -> Result<Document> {
    let root = plistor::codec::decode(json.as_bytes(), plistor::Format::Json)?;
    Ok(Document::create(dir.path().join("doc.json"), root, options)?)
}

fn quiet() -> DocumentOptions {
    DocumentOptions {
        autosave: false,
        ..DocumentOptions::default()
    }
}

fn parse(json: &str) -> Value {
    plistor::codec::from_source(json, plistor::Format::Json).unwrap()
}

#[test]
fn child_edit_reaches_root_and_leaves_siblings_alone() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let mut doc = json_doc(&dir, r#"{"a":{"b":1,"c":[1,2]},"d":"keep"}"#, quiet())?;
    let root = doc.open_root_view()?;
    let a = doc.open_child_view(root, "a")?;
    let b = doc.open_child_view(a, "b")?;
    let before = doc.generation();

    doc.set_value(b, Value::from("changed"))?;

    let expected = parse(r#"{"a":{"b":"changed","c":[1,2]},"d":"keep"}"#);
    assert_eq!(doc.root(), &expected);
    assert_eq!(doc.value(root)?, &expected);
    assert_eq!(doc.value(a)?, &parse(r#"{"b":"changed","c":[1,2]}"#));
    assert_eq!(doc.view_state(b)?, ViewState::Clean);
    assert_eq!(doc.generation(), before + 1);
    Ok(())
}

#[test]
fn overlapping_views_see_each_others_edits() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let mut doc = json_doc(&dir, r#"{"a":{"b":1}}"#, quiet())?;
    let first = doc.open_path(&["a"])?;
    let second = doc.open_path(&["a", "b"])?;

    doc.set_child(first, "b", Value::from(2))?;
    assert_eq!(doc.value(second)?, &Value::from(2));

    doc.set_value(second, Value::from(3))?;
    assert_eq!(doc.value(first)?, &parse(r#"{"b":3}"#));
    Ok(())
}

#[test]
fn replacing_an_ancestor_updates_or_detaches_descendants() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let mut doc = json_doc(&dir, r#"{"a":{"b":1}}"#, quiet())?;
    let root = doc.open_root_view()?;
    let a = doc.open_child_view(root, "a")?;
    let b = doc.open_child_view(a, "b")?;

    doc.set_value(a, parse(r#"{"b":5}"#))?;
    assert_eq!(doc.value(b)?, &Value::from(5));

    doc.set_value(a, Value::empty_object())?;
    assert_eq!(doc.view_state(b)?, ViewState::Detached);
    assert_eq!(doc.set_value(b, Value::Null), Err(EditError::DetachedView));
    assert_eq!(doc.value(a)?, &Value::empty_object());
    Ok(())
}

#[test]
fn deleting_a_node_detaches_only_its_views() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let mut doc = json_doc(&dir, r#"{"x":{"y":true},"z":0}"#, quiet())?;
    let root = doc.open_root_view()?;
    let x = doc.open_child_view(root, "x")?;
    let y = doc.open_child_view(x, "y")?;
    let z = doc.open_child_view(root, "z")?;

    doc.delete(x)?;
    assert_eq!(doc.view_state(x)?, ViewState::Detached);
    assert_eq!(doc.view_state(y)?, ViewState::Detached);
    assert_eq!(doc.value(x), Err(EditError::DetachedView));
    assert_eq!(doc.retype(y, ValueKind::String), Err(EditError::DetachedView));

    doc.set_value(z, Value::from(1))?;
    assert_eq!(doc.root(), &parse(r#"{"z":1}"#));
    assert_eq!(doc.delete(root), Err(EditError::RootCannotBeRemoved));
    Ok(())
}

#[test]
fn array_views_follow_their_element() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let mut doc = json_doc(&dir, "[10,20,30]", quiet())?;
    let root = doc.open_root_view()?;
    let last = doc.open_child_view(root, "2")?;
    let first = doc.open_child_view(root, "0")?;

    doc.remove_child(root, "0")?;
    assert_eq!(doc.view_state(first)?, ViewState::Detached);
    assert_eq!(doc.view_key(last)?, Some("1"));
    assert_eq!(doc.value(last)?, &Value::from(30));

    doc.insert_child(root, Some("0"), Value::from(5))?;
    assert_eq!(doc.view_key(last)?, Some("2"));

    doc.move_element(root, 2, 0)?;
    assert_eq!(doc.view_key(last)?, Some("0"));
    doc.set_value(last, Value::from(31))?;
    assert_eq!(doc.root(), &parse("[31,5,20]"));
    Ok(())
}

#[test]
fn array_insert_appends_or_places() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let mut doc = json_doc(&dir, "[1]", quiet())?;
    let root = doc.open_root_view()?;

    doc.insert_child(root, None, Value::from(2))?;
    doc.insert_child(root, Some("0"), Value::from(0))?;
    doc.add_item(root, None, ValueKind::Object)?;
    assert_eq!(doc.root(), &parse("[0,1,2,{}]"));

    assert_eq!(
        doc.insert_child(root, Some("9"), Value::Null),
        Err(EditError::IndexOutOfBounds { index: 9, len: 4 })
    );
    assert_eq!(
        doc.insert_child(root, Some("x"), Value::Null),
        Err(EditError::InvalidIndex("x".to_string()))
    );
    Ok(())
}

#[test]
fn duplicate_insert_overwrites_by_default() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let mut doc = json_doc(&dir, r#"{"x":1}"#, quiet())?;
    let root = doc.open_root_view()?;
    doc.insert_child(root, Some("x"), Value::from(2))?;
    assert_eq!(doc.root(), &parse(r#"{"x":2}"#));
    assert_eq!(doc.insert_child(root, None, Value::Null), Err(EditError::KeyRequired));
    assert_eq!(doc.insert_child(root, Some(""), Value::Null), Err(EditError::KeyRequired));
    Ok(())
}

#[test]
fn duplicate_insert_fails_under_reject_policy() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let options = DocumentOptions {
        duplicate_keys: DuplicateKeyPolicy::Reject,
        autosave: false,
    };
    let mut doc = json_doc(&dir, r#"{"x":1,"y":2}"#, options)?;
    let root = doc.open_root_view()?;
    assert_eq!(
        doc.insert_child(root, Some("x"), Value::from(2)),
        Err(EditError::DuplicateKey("x".to_string()))
    );
    assert_eq!(
        doc.rename_key(root, "x", "y"),
        Err(EditError::DuplicateKey("y".to_string()))
    );
    assert_eq!(doc.root(), &parse(r#"{"x":1,"y":2}"#));
    assert_eq!(doc.view_state(root)?, ViewState::Clean);
    Ok(())
}

#[test]
fn rename_keeps_position_and_moves_child_views() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let mut doc = json_doc(&dir, r#"{"a":1,"b":2,"c":3}"#, quiet())?;
    let root = doc.open_root_view()?;
    let b = doc.open_child_view(root, "b")?;
    let c = doc.open_child_view(root, "c")?;

    doc.rename_key(root, "b", "bee")?;
    let keys: Vec<String> = doc.root().as_object().unwrap().keys().cloned().collect();
    assert_eq!(keys, vec!["a", "bee", "c"]);
    assert_eq!(doc.view_key(b)?, Some("bee"));

    // Overwriting rename drops the old target and its views.
    doc.rename_key(root, "a", "c")?;
    assert_eq!(doc.root(), &parse(r#"{"c":1,"bee":2}"#));
    assert_eq!(doc.view_state(c)?, ViewState::Detached);
    Ok(())
}

#[test]
fn structural_operations_check_the_container_kind() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let mut doc = json_doc(&dir, r#"{"list":[1,2],"n":1}"#, quiet())?;
    let root = doc.open_root_view()?;
    let list = doc.open_child_view(root, "list")?;
    let n = doc.open_child_view(root, "n")?;

    assert_eq!(
        doc.rename_key(list, "0", "1"),
        Err(EditError::UnsupportedOperation { operation: "rename", kind: ValueKind::Array })
    );
    assert_eq!(
        doc.move_element(root, 0, 1),
        Err(EditError::UnsupportedOperation { operation: "move", kind: ValueKind::Object })
    );
    assert_eq!(
        doc.move_element(list, 0, 2),
        Err(EditError::IndexOutOfBounds { index: 2, len: 2 })
    );
    assert_eq!(doc.remove_child(n, "0"), Err(EditError::NotAContainer(ValueKind::Number)));
    assert_eq!(doc.remove_child(root, "missing"), Err(EditError::KeyNotFound("missing".to_string())));
    assert_eq!(doc.open_child_view(root, "missing"), Err(EditError::KeyNotFound("missing".to_string())));
    Ok(())
}

#[test]
fn retype_runs_through_propagation() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let mut doc = json_doc(&dir, r#"{"n":"42","bad":"abc","arr":[1,2]}"#, quiet())?;
    let root = doc.open_root_view()?;
    let n = doc.open_child_view(root, "n")?;

    doc.retype(n, ValueKind::Number)?;
    doc.retype_child(root, "bad", ValueKind::Number)?;
    doc.retype_child(root, "arr", ValueKind::Object)?;
    assert_eq!(doc.root(), &parse(r#"{"n":42,"bad":0,"arr":{"0":1,"1":2}}"#));
    assert_eq!(doc.value(n)?, &Value::from(42));
    Ok(())
}

#[test]
fn root_must_stay_a_container() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let mut doc = json_doc(&dir, r#"{"a":1}"#, quiet())?;
    let root = doc.open_root_view()?;
    let generation = doc.generation();

    assert_eq!(
        doc.retype(root, ValueKind::String),
        Err(EditError::Codec(CodecError::UnsupportedRoot(ValueKind::String)))
    );
    assert_eq!(doc.view_state(root)?, ViewState::Clean);
    assert_eq!(doc.generation(), generation);

    doc.retype(root, ValueKind::Array)?;
    assert_eq!(doc.root(), &parse("[1]"));
    Ok(())
}

#[test]
fn source_text_edits_a_subtree() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let mut doc = json_doc(&dir, r#"{"cfg":{"on":true}}"#, quiet())?;
    let cfg = doc.open_path(&["cfg"])?;
    assert_eq!(doc.source_text(cfg)?, "{\n  \"on\": true\n}\n");

    doc.set_source_text(cfg, r#"{"on": false, "level": 3}"#)?;
    assert_eq!(doc.root(), &parse(r#"{"cfg":{"on":false,"level":3}}"#));
    assert!(matches!(
        doc.set_source_text(cfg, "{oops"),
        Err(EditError::Codec(CodecError::MalformedInput { .. }))
    ));
    Ok(())
}

#[test]
fn rows_describe_children() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let mut doc = json_doc(&dir, r#"{"flag":true,"items":[1,2,3],"name":"x"}"#, quiet())?;
    let root = doc.open_root_view()?;
    let rows = doc.rows(root)?;
    let summaries: Vec<(&str, ValueKind, &str)> = rows
        .iter()
        .map(|r| (r.key.as_str(), r.kind, r.summary.as_str()))
        .collect();
    assert_eq!(
        summaries,
        vec![
            ("flag", ValueKind::Bool, "YES"),
            ("items", ValueKind::Array, "[3]"),
            ("name", ValueKind::String, "x"),
        ]
    );
    Ok(())
}

#[test]
fn closing_a_view_closes_its_descendants() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let mut doc = json_doc(&dir, r#"{"a":{"b":{"c":1}}}"#, quiet())?;
    let root = doc.open_root_view()?;
    let a = doc.open_child_view(root, "a")?;
    let b = doc.open_child_view(a, "b")?;
    let other = doc.open_root_view()?;

    doc.close_view(a)?;
    assert_eq!(doc.views(), vec![root, other]);
    assert_eq!(doc.value(b), Err(EditError::UnknownView));
    assert_eq!(doc.view_parent(root)?, None);
    Ok(())
}

#[test]
fn reopened_slots_do_not_answer_to_old_handles() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let mut doc = json_doc(&dir, r#"{"a":{"b":1},"c":[1,2]}"#, quiet())?;
    let old_c = doc.open_path(&["c"])?;
    let old_root = doc.view_parent(old_c)?.unwrap();
    doc.close_view(old_root)?;

    let root = doc.open_root_view()?;
    let a = doc.open_child_view(root, "a")?;
    let b = doc.open_child_view(a, "b")?;
    assert_eq!(doc.value(old_c), Err(EditError::UnknownView));
    assert_eq!(doc.value(old_root), Err(EditError::UnknownView));
    assert_eq!(doc.views(), vec![root, a, b]);

    // Parents may now sit in later slots than their children.
    doc.set_value(b, Value::from(5))?;
    assert_eq!(doc.value(a)?, &parse(r#"{"b":5}"#));
    assert_eq!(doc.value(root)?, &parse(r#"{"a":{"b":5},"c":[1,2]}"#));
    assert_eq!(doc.view_path(b)?, vec!["a".to_string(), "b".to_string()]);

    doc.close_view(root)?;
    assert!(doc.views().is_empty());
    Ok(())
}

#[test]
fn failed_path_leaves_no_views_behind() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let mut doc = json_doc(&dir, r#"{"a":{}}"#, quiet())?;
    assert_eq!(doc.open_path(&["a", "nope"]), Err(EditError::KeyNotFound("nope".to_string())));
    assert!(doc.views().is_empty());
    Ok(())
}

#[test]
fn closed_document_refuses_edits() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let mut doc = json_doc(&dir, r#"{"a":1}"#, quiet())?;
    doc.close();
    assert_eq!(doc.open_root_view(), Err(EditError::Closed));
    Ok(())
}
