//! Registration, the welcome burst and channel joins over a real socket.

mod common;

use common::{MockBackend, TestClient, TestGateway, test_config};

#[tokio::test]
async fn welcome_then_join_burst() -> anyhow::Result<()> {
    let gw = TestGateway::start(MockBackend::workspace()).await?;
    let mut client = TestClient::connect(gw.addr, "me").await?;

    let welcome = client.register().await?;
    assert_eq!(welcome[0], ":localhost 001 me :Welcome to slackirc");
    assert!(welcome.contains(&":localhost 002 me :Your team name is: Acme".to_string()));
    assert!(welcome.contains(&":localhost 002 me :Your nickname must be: me".to_string()));

    let burst = client.join("#general").await?;
    assert_eq!(
        burst,
        vec![
            ":me!me@127.0.0.1 JOIN #general",
            ":localhost 332 me #general :all hands",
            ":alice!alice@127.0.0.1 JOIN #general",
            ":bob!bob@127.0.0.1 JOIN #general",
            ":localhost 353 me = #general :me @alice bob",
            ":localhost 366 me #general :End of /NAMES list",
        ]
    );

    gw.stop().await
}

#[tokio::test]
async fn a_different_nick_is_corrected() -> anyhow::Result<()> {
    let gw = TestGateway::start(MockBackend::workspace()).await?;
    let mut client = TestClient::connect(gw.addr, "guest").await?;
    client.register().await?;
    assert_eq!(client.recv().await?, ":guest!guest@127.0.0.1 NICK me");

    client.send("NICK guest").await?;
    assert_eq!(
        client.recv().await?,
        ":localhost 432 me guest :Incorrect nickname, use me"
    );
    gw.stop().await
}

#[tokio::test]
async fn autojoin_brings_every_member_channel() -> anyhow::Result<()> {
    let mut config = test_config();
    config.gateway.autojoin = true;
    let gw = TestGateway::start_with(MockBackend::workspace(), config).await?;
    let mut client = TestClient::connect(gw.addr, "me").await?;
    client.register().await?;

    let first = client.recv_until(|l| l.contains(" 366 ")).await?;
    assert_eq!(first[0], ":me!me@127.0.0.1 JOIN #general");
    let second = client.recv_until(|l| l.contains(" 366 ")).await?;
    assert_eq!(second[0], ":me!me@127.0.0.1 JOIN #random");
    gw.stop().await
}

#[tokio::test]
async fn ping_and_quit() -> anyhow::Result<()> {
    let gw = TestGateway::start(MockBackend::workspace()).await?;
    let mut client = TestClient::connect(gw.addr, "me").await?;

    // Answered before registration too.
    client.send("PING :abc").await?;
    assert_eq!(client.recv().await?, ":localhost PONG localhost abc");

    client.send("JOIN #general").await?;
    assert_eq!(client.recv().await?, ":localhost 451 * :You have not registered");

    client.register().await?;
    client.send("QUIT :bye").await?;
    assert_eq!(client.recv().await?, "ERROR :Closing link (bye)");
    gw.stop().await
}

#[tokio::test]
async fn shutdown_closes_every_client() -> anyhow::Result<()> {
    let gw = TestGateway::start(MockBackend::workspace()).await?;
    let mut a = TestClient::connect(gw.addr, "me").await?;
    let mut b = TestClient::connect(gw.addr, "me").await?;
    a.register().await?;
    b.register().await?;

    gw.stop().await?;
    assert_eq!(a.recv().await?, "ERROR :Gateway shutting down");
    assert_eq!(b.recv().await?, "ERROR :Gateway shutting down");
    Ok(())
}
