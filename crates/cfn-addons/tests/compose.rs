//! End-to-end composition tests
//!
//! Each test builds a throwaway workspace and runs the whole pipeline on it.

use cfn_addons::composer::{ComposeErrorKind, Composer, Package, TemplateFormat, BUILD_DIR};
use cfn_addons::composite::{Issue, Section};
use cfn_addons::config::ComposeConfig;
use cfn_addons::diff::{diff_against, DiffError, DiffResult, FileTemplateSource};
use cfn_addons::exports::ResolveError;
use cfn_addons::overrides::{scaffold_patches, OverrideError, PatchError};
use cfn_addons::parameters::BindError;
use cfn_addons::scope::Target;
use pretty_assertions::assert_eq;
use std::path::Path;

const ENVIRONMENT_TABLE: &str = r#"
Parameters:
  App: { Type: String }
  Env: { Type: String }
Resources:
  MyTable:
    Type: AWS::DynamoDB::Table
    Properties:
      BillingMode: PAY_PER_REQUEST
Outputs:
  MyTableARN:
    Value: !GetAtt MyTable.Arn
    Export:
      Name: app-test-MyTableARN
"#;

const WORKLOAD_QUEUE: &str = r#"
Parameters:
  App: { Type: String }
  Env: { Type: String }
  Name: { Type: String }
Resources:
  Queue:
    Type: AWS::SQS::Queue
"#;

struct Workspace {
    dir: tempfile::TempDir,
}

impl Workspace {
    fn new() -> Self {
        let workspace = Self {
            dir: tempfile::tempdir().unwrap(),
        };
        workspace.write("environments/addons/table.yml", ENVIRONMENT_TABLE);
        workspace.write("api/addons/queue.yml", WORKLOAD_QUEUE);
        workspace
    }

    fn path(&self) -> &Path {
        self.dir.path()
    }

    fn write(&self, path: &str, contents: &str) {
        let path = self.path().join(path);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, contents).unwrap();
    }

    fn composer(&self) -> Composer {
        Composer::new(self.path().to_path_buf(), ComposeConfig::load(self.path()).unwrap())
    }
}

fn api() -> Target {
    Target::workload("app", "test", "api")
}

fn environment() -> Target {
    Target::environment("app", "test")
}

#[test]
fn manifest_reference_to_environment_export_resolves() {
    let workspace = Workspace::new();
    workspace.write(
        "api/manifest.yml",
        "name: api\nvariables:\n  TABLE_ARN:\n    from_cfn: app-test-MyTableARN\n",
    );

    let package = workspace.composer().compose(&api()).unwrap();

    assert_eq!(package.resolution.matched.len(), 1);
    let matched = &package.resolution.matched[0];
    assert_eq!(matched.exporting_stack, "app-test");
    assert_eq!(matched.reference.stack, "app-test-api");
}

#[test]
fn manifest_reference_to_unknown_export_fails() {
    let workspace = Workspace::new();
    workspace.write(
        "api/manifest.yml",
        "name: api\nvariables:\n  TABLE_ARN:\n    from_cfn: app-test-WrongName\n",
    );

    let err = workspace.composer().compose(&api()).unwrap_err();
    let ComposeErrorKind::Resolve(ResolveError::UnresolvedImport { name, consumer }) = &err.kind
    else {
        panic!("expected an unresolved import, got {err:?}");
    };

    assert_eq!(name, "app-test-WrongName");
    assert!(consumer.to_string().ends_with("(variables.TABLE_ARN.from_cfn)"));
}

#[test]
fn environment_section_replaces_manifest_reference() {
    let workspace = Workspace::new();
    workspace.write(
        "environments/addons/table.yml",
        r#"
Parameters: { App: { Type: String }, Env: { Type: String } }
Resources: { MyTable: { Type: AWS::DynamoDB::Table } }
Outputs:
  TableArn:
    Value: !GetAtt MyTable.Arn
    Export: { Name: !Sub "${App}-${Env}-TableArn" }
"#,
    );
    workspace.write(
        "api/manifest.yml",
        r#"
name: api
variables:
  TABLE:
    from_cfn: app-test-TableArn
environments:
  prod:
    variables:
      TABLE:
        from_cfn: app-prod-TableArn
"#,
    );

    let prod = workspace
        .composer()
        .compose(&Target::workload("app", "prod", "api"))
        .unwrap();
    assert_eq!(prod.resolution.matched.len(), 1);
    let matched = &prod.resolution.matched[0];
    assert_eq!(matched.reference.name.literal(), Some("app-prod-TableArn"));
    assert_eq!(matched.exporting_stack, "app-prod");

    let test = workspace.composer().compose(&api()).unwrap();
    assert_eq!(test.resolution.matched.len(), 1);
    assert_eq!(test.resolution.matched[0].exporting_stack, "app-test");
}

#[test]
fn environment_addon_cannot_import_workload_export() {
    let workspace = Workspace::new();
    workspace.write(
        "api/addons/queue-url.yml",
        r#"
Parameters: { App: { Type: String }, Env: { Type: String }, Name: { Type: String } }
Resources: { DeadLetters: { Type: AWS::SQS::Queue } }
Outputs:
  DeadLettersUrl:
    Value: !Ref DeadLetters
    Export: { Name: !Sub "${App}-${Env}-DeadLettersUrl" }
"#,
    );
    workspace.write(
        "environments/addons/alarm.yml",
        r#"
Resources:
  Alarm:
    Type: AWS::CloudWatch::Alarm
    Properties:
      AlarmDescription: !ImportValue app-test-DeadLettersUrl
"#,
    );

    let err = workspace.composer().compose(&environment()).unwrap_err();
    let ComposeErrorKind::Resolve(ResolveError::ReverseScopeImport { name, stack, .. }) = &err.kind
    else {
        panic!("expected a reverse scope import, got {err:?}");
    };
    assert_eq!(name, "app-test-DeadLettersUrl");
    assert_eq!(stack, "app-test-api");
}

#[test]
fn dynamically_named_import_is_unverifiable() {
    let workspace = Workspace::new();
    workspace.write(
        "api/addons/policy.yml",
        r#"
Parameters: { App: { Type: String }, Env: { Type: String }, Name: { Type: String } }
Resources:
  Policy:
    Type: AWS::IAM::ManagedPolicy
    Properties:
      Description:
        Fn::ImportValue: !Sub "${AWS::StackName}-X"
"#,
    );

    let package = workspace.composer().compose(&api()).unwrap();
    assert_eq!(package.resolution.unverifiable.len(), 1);
    assert!(package.resolution.matched.is_empty());
}

#[test]
fn reference_to_deploy_time_export_name_is_unverifiable() {
    let workspace = Workspace::new();
    workspace.write(
        "environments/addons/table-name.yml",
        r#"
Outputs:
  MyTableName:
    Value: !Ref MyTable
    Export: { Name: !Sub "${AWS::StackName}-MyTableName" }
"#,
    );
    workspace.write(
        "api/manifest.yml",
        "name: api\nvariables:\n  TABLE_NAME:\n    from_cfn: app-test-MyTableName\n",
    );

    let package = workspace.composer().compose(&api()).unwrap();
    assert_eq!(package.resolution.unverifiable.len(), 1);

    workspace.write(
        "api/manifest.yml",
        "name: api\nvariables:\n  TABLE_NAME:\n    from_cfn: app-test-TableNameOther\n",
    );
    let err = workspace.composer().compose(&api()).unwrap_err();
    assert!(matches!(
        err.kind,
        ComposeErrorKind::Resolve(ResolveError::UnresolvedImport { .. })
    ));
}

#[test]
fn duplicate_resource_across_files() {
    let workspace = Workspace::new();
    workspace.write(
        "environments/addons/table-copy.yml",
        "Parameters: { App: { Type: String }, Env: { Type: String } }\nResources:\n  MyTable: { Type: AWS::DynamoDB::Table }\n",
    );

    let err = workspace.composer().compose(&environment()).unwrap_err();
    let ComposeErrorKind::Merge(errors) = &err.kind else {
        panic!("expected merge errors, got {err:?}");
    };

    assert!(matches!(
        errors.issues(),
        [Issue::DuplicateLogicalName { section: Section::Resources, name, .. }] if name == "MyTable"
    ));
}

#[test]
fn disjoint_fragments_keep_every_entry() {
    let workspace = Workspace::new();
    workspace.write(
        "environments/addons/topic.yml",
        r#"
Parameters: { App: { Type: String }, Env: { Type: String } }
Conditions: { IsProd: !Equals [!Ref Env, prod] }
Resources:
  Topic: { Type: AWS::SNS::Topic }
  Subscription: { Type: AWS::SNS::Subscription, Condition: IsProd }
Outputs:
  TopicArn: { Value: !Ref Topic }
"#,
    );

    let package = workspace.composer().compose(&environment()).unwrap();
    let count = |section: &str| package.template[section].as_object().unwrap().len();

    assert_eq!(count("Resources"), 1 + 2);
    assert_eq!(count("Outputs"), 1 + 1);
    assert_eq!(count("Conditions"), 1);
    assert_eq!(count("Parameters"), 2);
}

#[test]
fn extra_parameter_needs_a_companion_value() {
    let workspace = Workspace::new();
    workspace.write(
        "api/addons/policy.yml",
        r#"
Parameters:
  App: { Type: String }
  Env: { Type: String }
  Name: { Type: String }
  DiscoveryServiceArn: { Type: String }
Resources:
  Policy: { Type: AWS::IAM::ManagedPolicy }
"#,
    );

    let err = workspace.composer().compose(&api()).unwrap_err();
    assert!(matches!(
        &err.kind,
        ComposeErrorKind::Bind(BindError::UnboundParameter { name, .. }) if name == "DiscoveryServiceArn"
    ));

    workspace.write(
        "api/addons/addons.parameters.yml",
        "Parameters:\n  DiscoveryServiceArn: !GetAtt DiscoveryService.Arn\n",
    );
    let package = workspace.composer().compose(&api()).unwrap();
    assert_eq!(
        package.parameters.to_parameter_file(),
        serde_json::json!({
            "Parameters": {
                "App": "app",
                "Env": "test",
                "Name": "api",
                "DiscoveryServiceArn": { "Fn::GetAtt": ["DiscoveryService", "Arn"] }
            }
        })
    );
}

#[test]
fn patch_on_missing_path_names_the_path() {
    let workspace = Workspace::new();
    workspace.write(
        "api/overrides/cfn.patches.yml",
        "- op: replace\n  path: /Resources/TaskRole\n  value: {}\n",
    );

    let err = workspace.composer().compose(&api()).unwrap_err();
    assert!(matches!(
        &err.kind,
        ComposeErrorKind::Override(OverrideError::Patch(PatchError::PathNotFound { path, .. }))
            if path == "/Resources/TaskRole"
    ));
}

#[test]
fn patches_are_applied_to_the_package() {
    let workspace = Workspace::new();
    workspace.write(
        "environments/overrides/cfn.patches.yml",
        r#"
- op: replace
  path: /Resources/MyTable/Properties/BillingMode
  value: PROVISIONED
- op: add
  path: /Resources/MyTable/DeletionPolicy
  value: Retain
"#,
    );

    let package = workspace.composer().compose(&environment()).unwrap();
    let table = &package.template["Resources"]["MyTable"];
    assert_eq!(table["Properties"]["BillingMode"], "PROVISIONED");
    assert_eq!(table["DeletionPolicy"], "Retain");
}

#[test]
fn scaffolded_patch_file_changes_nothing() {
    let workspace = Workspace::new();
    let before = workspace.composer().compose(&environment()).unwrap();

    scaffold_patches(&environment().overrides_dir(workspace.path())).unwrap();
    let after = workspace.composer().compose(&environment()).unwrap();

    assert_eq!(after.template, before.template);
}

#[test]
fn both_override_mechanisms_conflict() {
    let workspace = Workspace::new();
    workspace.write("api/overrides/cfn.patches.yml", "[]\n");
    workspace.write("api/overrides/override.yml", "command: [cat]\n");

    let err = workspace.composer().compose(&api()).unwrap_err();
    assert!(matches!(
        err.kind,
        ComposeErrorKind::Override(OverrideError::ConflictingOverrides { .. })
    ));
}

#[test]
fn diff_against_previous_package() {
    let workspace = Workspace::new();
    let build_dir = workspace.path().join(BUILD_DIR);
    let previous = build_dir.join(Package::template_file_name(&api(), TemplateFormat::Yaml));
    let source = FileTemplateSource::new(previous);

    let package = workspace.composer().compose(&api()).unwrap();
    let first = diff_against(&source, "app-test-api", &package.template);
    assert!(matches!(first, DiffResult::Error(DiffError::DiffUnavailable { .. })));
    assert_eq!(first.exit_code(), 2);

    package.write_to(&build_dir, TemplateFormat::Yaml).unwrap();
    let unchanged = diff_against(&source, "app-test-api", &package.template);
    assert!(matches!(unchanged, DiffResult::NoDiff));

    workspace.write(
        "api/addons/queue.yml",
        &format!("{WORKLOAD_QUEUE}    Properties:\n      VisibilityTimeout: 60\n"),
    );
    let changed = workspace.composer().compose(&api()).unwrap();
    let DiffResult::Diff(changeset) = diff_against(&source, "app-test-api", &changed.template)
    else {
        panic!("expected a diff");
    };

    insta::assert_snapshot!(changeset.to_string().trim_end(), @r###"
    ~ Resources:
      ~ Queue:
        + Properties: {"VisibilityTimeout":60}
    "###);
}
