// End-to-end controller tests against the in-process Miniserver.
#![allow(clippy::unwrap_used)]

mod support;

use std::sync::atomic::Ordering;
use std::time::Duration;

use loxone_api::AuthError;
use loxone_core::{
    CommandError, ConnectionState, Controller, CoreError, DispatchedValue, Subscription,
};
use pretty_assertions::assert_eq;

use support::{KITCHEN, KITCHEN_VALUE, MockMiniserver, id};

const WAIT: Duration = Duration::from_secs(5);

async fn next_update(subscription: &mut Subscription) -> DispatchedValue {
    tokio::time::timeout(WAIT, subscription.recv())
        .await
        .unwrap()
        .unwrap()
        .value
        .clone()
}

async fn wait_for_connections(mock: &MockMiniserver, count: usize) {
    tokio::time::timeout(WAIT, async {
        while mock.state.connections.load(Ordering::SeqCst) < count {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();
}

async fn wait_live(controller: &Controller) {
    let mut rx = controller.connection_state();
    tokio::time::timeout(WAIT, rx.wait_for(|s| s.is_live()))
        .await
        .unwrap()
        .unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn kitchen_light_update_reaches_subscriber() {
    let mock = MockMiniserver::start().await;
    let controller = Controller::new(mock.config("secret"));
    controller.connect().await.unwrap();

    assert_eq!(*controller.connection_state().borrow(), ConnectionState::Live);
    let structure = controller.structure().unwrap();
    let light = structure.control(&id(KITCHEN)).unwrap();
    assert_eq!(light.name, "Kitchen Light");
    let (owner, role) = structure.resolve_role(&id(KITCHEN_VALUE)).unwrap();
    assert_eq!(owner.id, id(KITCHEN));
    assert_eq!(role, "value");

    let mut subscription = controller.subscribe(id(KITCHEN_VALUE));
    mock.push_values(&[(id(KITCHEN_VALUE), 1.0)]);

    assert_eq!(next_update(&mut subscription).await, DispatchedValue::Number(1.0));
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(subscription.try_recv().is_none());
    assert_eq!(
        controller.last_value(&id(KITCHEN_VALUE)),
        Some(DispatchedValue::Number(1.0))
    );

    let session = controller.session();
    assert!(session.key_established);
    assert_eq!(session.token_rights, Some(4));
    assert!(session.refresh_due.is_some());

    controller.disconnect().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn token_commands_travel_encrypted() {
    let mock = MockMiniserver::start().await;
    let controller = Controller::new(mock.config("secret"));
    controller.connect().await.unwrap();

    // The mock only sees getjwt after decrypting it, so a logged getjwt
    // implies a valid key exchange and salt.
    assert_eq!(mock.requested("jdev/sys/getjwt/"), 1);
    assert_eq!(mock.requested("jdev/sys/keyexchange/"), 1);
    assert_eq!(mock.requested("jdev/sps/enablebinstatusupdate"), 1);
    controller.disconnect().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn commands_are_acknowledged_when_live() {
    let mock = MockMiniserver::start().await;
    let controller = Controller::new(mock.config("secret"));
    controller.connect().await.unwrap();

    let response = controller.send_command(&id(KITCHEN), "on").await.unwrap();
    assert_eq!(response.code, 200);
    assert_eq!(mock.requested(&format!("jdev/sps/io/{}/on", id(KITCHEN))), 1);

    controller.disconnect().await;
    assert_eq!(
        controller.send_command(&id(KITCHEN), "off").await,
        Err(CommandError::NotConnected)
    );
    assert_eq!(*controller.connection_state().borrow(), ConnectionState::Disconnected);
    assert!(!controller.session().key_established);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn invalid_credentials_are_terminal() {
    let mock = MockMiniserver::start().await;
    let controller = Controller::new(mock.config("wrong"));

    let err = controller.connect().await.unwrap_err();
    assert!(matches!(
        err,
        CoreError::Auth(AuthError::InvalidCredentials { .. })
    ));
    assert!(controller.last_error().is_some());
    assert_eq!(*controller.connection_state().borrow(), ConnectionState::Disconnected);

    // No reconnect loop after a terminal failure.
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(mock.state.connections.load(Ordering::SeqCst), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn unanswered_keepalives_drop_the_link() {
    let mock = MockMiniserver::start().await;
    mock.state.ack_keepalive.store(false, Ordering::SeqCst);
    let mut config = mock.config("secret");
    config.keepalive_interval = Duration::from_millis(200);
    config.keepalive_timeout = Duration::from_millis(100);
    let controller = Controller::new(config);
    controller.connect().await.unwrap();

    wait_for_connections(&mock, 2).await;
    wait_live(&controller).await;
    controller.disconnect().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn subscriptions_survive_reconnect_and_structure_is_reused() {
    let mock = MockMiniserver::start().await;
    let controller = Controller::new(mock.config("secret"));
    controller.connect().await.unwrap();
    let mut subscription = controller.subscribe(id(KITCHEN_VALUE));

    mock.kill_connections();
    wait_for_connections(&mock, 2).await;
    wait_live(&controller).await;

    mock.push_values(&[(id(KITCHEN_VALUE), 42.5)]);
    assert_eq!(next_update(&mut subscription).await, DispatchedValue::Number(42.5));

    assert_eq!(mock.state.structure_downloads.load(Ordering::SeqCst), 1);
    assert_eq!(mock.requested("jdev/sps/LoxAPPversion3"), 1);
    // The token from the first session is reused instead of the password.
    assert_eq!(mock.state.token_logins.load(Ordering::SeqCst), 1);
    assert_eq!(mock.requested("jdev/sys/getjwt/"), 1);

    controller.disconnect().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn wildcard_subscription_sees_every_state() {
    let mock = MockMiniserver::start().await;
    let controller = Controller::new(mock.config("secret"));
    controller.connect().await.unwrap();
    let mut all = controller.subscribe_all();

    let unknown = id("0f1e2d3c-0000-00ff-ffff0000000000ff");
    mock.push_values(&[(id(KITCHEN_VALUE), 0.0), (unknown, 7.0)]);

    let first = tokio::time::timeout(WAIT, all.recv()).await.unwrap().unwrap();
    let second = tokio::time::timeout(WAIT, all.recv()).await.unwrap().unwrap();
    assert_eq!(first.control, Some(id(KITCHEN)));
    assert_eq!(first.role.as_deref(), Some("value"));
    assert_eq!(second.id, unknown);
    assert_eq!(second.control, None);
    assert_eq!(second.value, DispatchedValue::Number(7.0));

    controller.disconnect().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn on_update_callback_runs_per_update() {
    let mock = MockMiniserver::start().await;
    let controller = Controller::new(mock.config("secret"));
    controller.connect().await.unwrap();

    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    let handle = controller.on_update(id(KITCHEN_VALUE), move |update| {
        let _ = tx.send(update.value.clone());
    });
    mock.push_values(&[(id(KITCHEN_VALUE), 3.0)]);

    let value = tokio::time::timeout(WAIT, rx.recv()).await.unwrap().unwrap();
    assert_eq!(value, DispatchedValue::Number(3.0));
    handle.abort();
    controller.disconnect().await;
}
