// self
use aws_identity_broker::{
	_preludet::*,
	auth::{CredentialId, FeatureId, ScopeSet},
	config::BrokerConfig,
	connection::{Connection, ConnectionKind, Feature},
	context::ToolkitContext,
	identity::{IdentifierChange, InMemoryProfileSource, ProfileSet},
	pinning::{FilePinStore, PinEvent, PinMap, PinStore},
};

fn feature(id: &str) -> Feature {
	Feature::new(FeatureId::new(id).expect("Feature fixture should be valid."), id)
}

fn profiles() -> ProfileSet {
	ProfileSet::default()
		.with_profile("dev", [("aws_access_key_id", "AKIADEV"), ("aws_secret_access_key", "secret")])
		.with_profile("loop-a", [
			("role_arn", "arn:aws:iam::111111111111:role/a"),
			("source_profile", "loop-b"),
		])
		.with_profile("loop-b", [
			("role_arn", "arn:aws:iam::111111111111:role/b"),
			("source_profile", "loop-a"),
		])
		.with_sso_session("corp", [
			("sso_start_url", "https://d-777.awsapps.com/start"),
			("sso_region", "us-east-1"),
			("sso_registration_scopes", "sso:account:access,codewhisperer:completions"),
		])
		.with_sso_session("narrow", [
			("sso_start_url", "https://d-778.awsapps.com/start"),
			("sso_region", "us-east-1"),
		])
}

fn context(pins: Option<std::path::PathBuf>, factory: Option<Arc<StaticFactory>>) -> ToolkitContext {
	let mut config = BrokerConfig::default();

	config.pins_path = pins;

	let mut builder = ToolkitContext::builder(config)
		.oidc_client(Arc::new(FakeOidcClient::default()))
		.prompt(Arc::new(RecordingPrompt::default()))
		.exchanger(Arc::new(FakeExchanger::default()))
		.profile_source(Arc::new(InMemoryProfileSource::new(profiles())));

	if let Some(factory) = factory {
		builder = builder.factory(factory);
	}

	builder.build().expect("Context should build.")
}

fn connection(context: &ToolkitContext, id: &str) -> Connection {
	context
		.registry()
		.connection(&CredentialId::new(id).expect("Credential fixture should be valid."))
		.expect("Connection should be registered.")
}

#[test]
fn switching_connections_moves_only_supported_features() {
	let context = context(None, None);
	let corp = connection(&context, "sso-session:corp");
	let narrow = connection(&context, "sso-session:narrow");
	let explorer = feature("explorer").accepting(ConnectionKind::Bearer);
	let completions = feature("completions").accepting(ConnectionKind::Bearer).requiring(
		ScopeSet::new(["codewhisperer:completions"]).expect("Scope fixture should be valid."),
	);
	let pinning = context.pinning();

	pinning
		.pin_features(None, &corp, &[explorer.clone(), completions.clone()])
		.expect("Initial pins should persist.");

	assert_eq!(pinning.get_pinned_connection(&explorer).map(|c| c.id), Some(corp.id.clone()));
	assert_eq!(pinning.get_pinned_connection(&completions).map(|c| c.id), Some(corp.id.clone()));

	pinning
		.pin_features(Some(&corp), &narrow, &[explorer.clone(), completions.clone()])
		.expect("Switching should persist.");

	assert_eq!(pinning.get_pinned_connection(&explorer).map(|c| c.id), Some(narrow.id.clone()));
	assert_eq!(
		pinning.get_pinned_connection(&completions).map(|c| c.id),
		Some(corp.id.clone()),
		"A feature the new connection cannot serve stays on the old one."
	);
}

#[test]
fn unsupported_kinds_are_left_unpinned() {
	let context = context(None, None);
	let dev = connection(&context, "profile:dev");
	let completions = feature("completions").accepting(ConnectionKind::Bearer);
	let events = Arc::new(Mutex::new(Vec::new()));
	let sink = events.clone();
	let _subscription = context.pinning().subscribe(move |event: &PinEvent| sink.lock().push(event.clone()));

	context.pinning().pin_features(None, &dev, &[completions.clone()]).expect("Pins should persist.");

	assert!(!context.pinning().is_feature_pinned(&completions));
	assert!(context.pinning().pins().is_empty());
	assert!(events.lock().is_empty(), "Clearing an absent pin is not a change.");
}

#[test]
fn removing_a_connection_drops_its_pins() {
	let factory = Arc::new(StaticFactory::new("static"));
	let context = context(None, Some(factory.clone()));

	factory.announce(IdentifierChange::added([factory.identifier("static:a")]));

	let explorer = feature("explorer").accepting(ConnectionKind::Iam);
	let target = connection(&context, "static:a");

	context
		.pinning()
		.set_pinned_connection(&explorer, Some(&target))
		.expect("Pin should persist.");

	assert!(context.pinning().is_feature_pinned(&explorer));

	let mut stream = context.pinning().stream();

	factory.announce(IdentifierChange::removed([target.id.clone()]));

	assert!(!context.pinning().is_feature_pinned(&explorer));
	assert!(context.pinning().pins().is_empty());
	assert_eq!(
		stream.try_recv().expect("Unpin should be broadcast."),
		PinEvent::Changed { feature: explorer.id.clone(), connection: None }
	);
}

#[test]
fn pins_survive_a_restart() {
	let path = temp_path("pinning_restart").join("pins.json");
	let explorer = feature("explorer").accepting(ConnectionKind::Iam);

	{
		let context = context(Some(path.clone()), None);
		let dev = connection(&context, "profile:dev");

		context
			.pinning()
			.set_pinned_connection(&explorer, Some(&dev))
			.expect("Pin should persist.");
	}

	assert_eq!(FilePinStore::new(&path).load().expect("Pin file should load.").len(), 1);

	let restarted = context(Some(path.clone()), None);

	assert_eq!(
		restarted.pinning().get_pinned_connection(&explorer).map(|c| c.id.to_string()),
		Some("profile:dev".to_owned())
	);

	let _ = std::fs::remove_dir_all(path.parent().expect("Pin file should have a parent."));
}

#[test]
fn pins_to_unlisted_connections_read_as_absent() {
	let path = temp_path("pinning_unlisted").join("pins.json");
	let explorer = feature("explorer").accepting(ConnectionKind::Iam);
	let debugger = feature("debugger").accepting(ConnectionKind::Iam);
	let looping = CredentialId::new("profile:loop-a").expect("Credential fixture should be valid.");

	FilePinStore::new(&path)
		.save(&PinMap::from([
			(explorer.id.clone(), looping.clone()),
			(debugger.id.clone(), CredentialId::new("profile:dev").expect("Credential fixture should be valid.")),
		]))
		.expect("Pin file should be written.");

	let context = context(Some(path.clone()), None);

	assert!(context.registry().connection(&looping).is_some(), "The cyclic profile is stored.");
	assert!(context.registry().list_identifiers().iter().all(|identifier| identifier.id != looping));
	assert!(!context.pinning().is_feature_pinned(&explorer));
	assert_eq!(
		context.pinning().get_pinned_connection(&debugger).map(|c| c.id.to_string()),
		Some("profile:dev".to_owned())
	);
	assert_eq!(
		FilePinStore::new(&path).load().expect("Pin file should load.").len(),
		1,
		"Loading drops the pin to the unlisted connection."
	);

	let stored = connection(&context, "profile:loop-a");

	context
		.pinning()
		.set_pinned_connection(&explorer, Some(&stored))
		.expect("Pin should persist.");

	assert!(context.pinning().get_pinned_connection(&explorer).is_none());

	let _ = std::fs::remove_dir_all(path.parent().expect("Pin file should have a parent."));
}
