use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio_postgres::{Client, Config, NoTls, SimpleQueryMessage, SimpleQueryRow};
use ulid::Ulid;

use innkeep::engine::Engine;
use innkeep::model::DAY_MS;
use innkeep::wire::{self, HotelFactory};

// ── Test infrastructure ──────────────────────────────────────

async fn start_test_server() -> (SocketAddr, Arc<Engine>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let dir = std::env::temp_dir().join(format!("innkeep_int_test_{}", Ulid::new()));
    std::fs::create_dir_all(&dir).unwrap();
    let engine = Arc::new(Engine::new(dir.join("innkeep.wal")).unwrap());
    let factory = Arc::new(HotelFactory::new(engine.clone()));

    tokio::spawn(async move {
        loop {
            let (socket, _) = match listener.accept().await {
                Ok(conn) => conn,
                Err(_) => break,
            };
            let factory = factory.clone();
            tokio::spawn(async move {
                let _ = wire::process_connection(socket, factory, None).await;
            });
        }
    });

    (addr, engine)
}

async fn connect(addr: SocketAddr) -> Client {
    let mut config = Config::new();
    config
        .host(addr.ip().to_string())
        .port(addr.port())
        .dbname("hotel")
        .user("frontdesk");

    let (client, connection) = config.connect(NoTls).await.unwrap();
    tokio::spawn(async move {
        let _ = connection.await;
    });
    client
}

async fn rows(client: &Client, sql: &str) -> Vec<SimpleQueryRow> {
    client
        .simple_query(sql)
        .await
        .unwrap()
        .into_iter()
        .filter_map(|msg| match msg {
            SimpleQueryMessage::Row(row) => Some(row),
            _ => None,
        })
        .collect()
}

async fn sqlstate(client: &Client, sql: &str) -> String {
    let err = client.simple_query(sql).await.unwrap_err();
    err.code().map(|c| c.code().to_string()).unwrap_or_default()
}

/// Midnight UTC `days` from now; always in the future for days >= 2.
fn day(days: i64) -> i64 {
    let now = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_millis() as i64;
    (now / DAY_MS + days) * DAY_MS
}

async fn add_room(client: &Client, number: &str, room_type: &str, price: f64) -> Ulid {
    let id = Ulid::new();
    client
        .batch_execute(&format!(
            "INSERT INTO rooms (id, number, room_type, price) VALUES ('{id}', '{number}', '{room_type}', {price})"
        ))
        .await
        .unwrap();
    id
}

async fn add_guest(client: &Client, email: &str) -> Ulid {
    let id = Ulid::new();
    client
        .batch_execute(&format!(
            "INSERT INTO guests (id, name, email, phone) VALUES ('{id}', 'Test Guest', '{email}', '555-0100')"
        ))
        .await
        .unwrap();
    id
}

// ── Tests ────────────────────────────────────────────────────

#[tokio::test]
async fn room_round_trip() {
    let (addr, _engine) = start_test_server().await;
    let client = connect(addr).await;

    let id = Ulid::new();
    client
        .batch_execute(&format!(
            "INSERT INTO rooms (id, number, room_type, price, capacity, amenities) \
             VALUES ('{id}', '204', 'suite', 250.0, 4, 'WiFi, Balcony')"
        ))
        .await
        .unwrap();

    let found = rows(&client, &format!("SELECT * FROM rooms WHERE id = '{id}'")).await;
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].get("number"), Some("204"));
    assert_eq!(found[0].get("room_type"), Some("suite"));
    assert_eq!(found[0].get("status"), Some("available"));
    assert_eq!(found[0].get("capacity"), Some("4"));
    assert_eq!(found[0].get("amenities"), Some(r#"["WiFi","Balcony"]"#));

    client
        .batch_execute(&format!("UPDATE rooms SET status = 'maintenance' WHERE id = '{id}'"))
        .await
        .unwrap();
    let listed = rows(&client, "SELECT * FROM rooms WHERE status = 'maintenance'").await;
    assert_eq!(listed.len(), 1);
}

#[tokio::test]
async fn booking_priced_and_conflicts_reported() {
    let (addr, _engine) = start_test_server().await;
    let client = connect(addr).await;
    let room = add_room(&client, "101", "double", 100.0).await;
    let guest = add_guest(&client, "ada@example.com").await;

    let first = Ulid::new();
    let created = rows(
        &client,
        &format!(
            "INSERT INTO bookings (id, guest_id, room_id, check_in, check_out) \
             VALUES ('{first}', '{guest}', '{room}', {}, {})",
            day(5),
            day(8)
        ),
    )
    .await;
    assert_eq!(created.len(), 1);
    assert_eq!(created[0].get("nights"), Some("3"));
    let total: f64 = created[0].get("total_price").unwrap().parse().unwrap();
    assert_eq!(total, 300.0);
    assert_eq!(created[0].get("status"), Some("pending"));
    assert_eq!(created[0].get("guest_email"), Some("ada@example.com"));
    assert_eq!(created[0].get("warning"), None);

    let overlapping = format!(
        "INSERT INTO bookings (id, guest_id, room_id, check_in, check_out) \
         VALUES ('{}', '{guest}', '{room}', {}, {})",
        Ulid::new(),
        day(7),
        day(10)
    );
    assert_eq!(sqlstate(&client, &overlapping).await, "23P01");

    let availability = rows(
        &client,
        &format!(
            "SELECT * FROM availability WHERE room_id = '{room}' AND check_in >= {} AND check_out <= {}",
            day(6),
            day(9)
        ),
    )
    .await;
    assert!(matches!(availability[0].get("available"), Some("f") | Some("false")));
    let first_id = first.to_string();
    assert_eq!(availability[0].get("conflict_booking_id"), Some(first_id.as_str()));

    // Adjacent stay is fine.
    let adjacent = rows(
        &client,
        &format!(
            "INSERT INTO bookings (id, guest_id, room_id, check_in, check_out) \
             VALUES ('{}', '{guest}', '{room}', {}, {})",
            Ulid::new(),
            day(8),
            day(9)
        ),
    )
    .await;
    assert_eq!(adjacent.len(), 1);
}

#[tokio::test]
async fn lifecycle_over_the_wire() {
    let (addr, engine) = start_test_server().await;
    let client = connect(addr).await;
    let room = add_room(&client, "301", "single", 80.0).await;
    let guest = add_guest(&client, "lin@example.com").await;

    let id = Ulid::new();
    client
        .batch_execute(&format!(
            "INSERT INTO bookings (id, guest_id, room_id, check_in, check_out) \
             VALUES ('{id}', '{guest}', '{room}', {}, {})",
            day(3),
            day(4)
        ))
        .await
        .unwrap();

    for status in ["confirmed", "checked-in"] {
        let updated = rows(
            &client,
            &format!("UPDATE bookings SET status = '{status}' WHERE id = '{id}'"),
        )
        .await;
        assert_eq!(updated[0].get("status"), Some(status));
    }
    assert_eq!(
        engine.get_room(room).await.unwrap().status,
        innkeep::model::RoomStatus::Occupied
    );

    // checked-in → pending is not a legal move.
    assert_eq!(
        sqlstate(&client, &format!("UPDATE bookings SET status = 'pending' WHERE id = '{id}'")).await,
        "55000"
    );

    rows(
        &client,
        &format!("UPDATE bookings SET status = 'checked-out' WHERE id = '{id}'"),
    )
    .await;
    assert_eq!(
        engine.get_room(room).await.unwrap().status,
        innkeep::model::RoomStatus::Available
    );

    let history = rows(&client, &format!("SELECT * FROM bookings WHERE room_id = '{room}'")).await;
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].get("status"), Some("checked-out"));
}

#[tokio::test]
async fn guarded_deletes_and_not_found() {
    let (addr, _engine) = start_test_server().await;
    let client = connect(addr).await;
    let room = add_room(&client, "401", "deluxe", 400.0).await;
    let guest = add_guest(&client, "sam@example.com").await;
    let booking = Ulid::new();
    client
        .batch_execute(&format!(
            "INSERT INTO bookings (id, guest_id, room_id, check_in, check_out) \
             VALUES ('{booking}', '{guest}', '{room}', {}, {})",
            day(10),
            day(12)
        ))
        .await
        .unwrap();

    assert_eq!(sqlstate(&client, &format!("DELETE FROM rooms WHERE id = '{room}'")).await, "55000");
    assert_eq!(sqlstate(&client, &format!("DELETE FROM guests WHERE id = '{guest}'")).await, "55000");

    client
        .batch_execute(&format!("DELETE FROM bookings WHERE id = '{booking}'"))
        .await
        .unwrap();
    client
        .batch_execute(&format!("DELETE FROM guests WHERE id = '{guest}'"))
        .await
        .unwrap();

    assert_eq!(
        sqlstate(&client, &format!("SELECT * FROM guests WHERE id = '{guest}'")).await,
        "P0002"
    );
}

#[tokio::test]
async fn validation_and_parse_errors() {
    let (addr, _engine) = start_test_server().await;
    let client = connect(addr).await;
    add_guest(&client, "dup@example.com").await;

    let dup = format!(
        "INSERT INTO guests (id, name, email, phone) VALUES ('{}', 'Other', 'DUP@example.com', '1')",
        Ulid::new()
    );
    assert_eq!(sqlstate(&client, &dup).await, "23514");
    assert_eq!(sqlstate(&client, "SELECT * FROM invoices").await, "42601");
    assert_eq!(sqlstate(&client, "SELEKT nonsense").await, "42601");

    let room = add_room(&client, "501", "single", 50.0).await;
    let backwards = format!(
        "SELECT * FROM availability WHERE room_id = '{room}' AND check_in >= {} AND check_out <= {}",
        day(4),
        day(2)
    );
    assert_eq!(sqlstate(&client, &backwards).await, "22023");
}

#[tokio::test]
async fn available_rooms_cheapest_first() {
    let (addr, _engine) = start_test_server().await;
    let client = connect(addr).await;
    add_room(&client, "601", "double", 180.0).await;
    add_room(&client, "602", "double", 120.0).await;
    let closed = add_room(&client, "603", "double", 90.0).await;
    add_room(&client, "604", "suite", 60.0).await;
    client
        .batch_execute(&format!("UPDATE rooms SET status = 'maintenance' WHERE id = '{closed}'"))
        .await
        .unwrap();

    let found = rows(
        &client,
        &format!(
            "SELECT * FROM available_rooms WHERE check_in >= {} AND check_out <= {} AND room_type = 'double'",
            day(2),
            day(4)
        ),
    )
    .await;
    let numbers: Vec<_> = found.iter().filter_map(|r| r.get("number")).collect();
    assert_eq!(numbers, vec!["602", "601"]);
}

#[tokio::test]
async fn extended_protocol_parameters() {
    let (addr, _engine) = start_test_server().await;
    let client = connect(addr).await;

    let id = Ulid::new().to_string();
    let inserted = client
        .execute(
            "INSERT INTO guests (id, name, email, phone) VALUES ($1, $2, $3, $4)",
            &[&id, &"O'Brien", &"obrien@example.com", &"555-0199"],
        )
        .await
        .unwrap();
    assert_eq!(inserted, 1);

    let found = rows(&client, &format!("SELECT * FROM guests WHERE id = '{id}'")).await;
    assert_eq!(found[0].get("name"), Some("O'Brien"));
    assert_eq!(found[0].get("address"), None);
}

#[tokio::test]
async fn bound_values_stored_verbatim() {
    let (addr, _engine) = start_test_server().await;
    let client = connect(addr).await;

    let id = Ulid::new().to_string();
    client
        .execute(
            "INSERT INTO guests (id, name, email, phone, address) VALUES ($1, $2, $3, $4, $5)",
            &[&id, &"Ada", &"ada.dollar@example.com", &"555", &"Suite $1 upstairs"],
        )
        .await
        .unwrap();
    client
        .execute(
            "UPDATE guests SET id_number = $1 WHERE id = $2",
            &[&"$2 ') OR 1=1 --", &id],
        )
        .await
        .unwrap();

    let found = rows(&client, &format!("SELECT * FROM guests WHERE id = '{id}'")).await;
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].get("address"), Some("Suite $1 upstairs"));
    assert_eq!(found[0].get("id_number"), Some("$2 ') OR 1=1 --"));
    assert_eq!(found[0].get("email"), Some("ada.dollar@example.com"));
}

#[tokio::test]
async fn demo_seed_loads_and_histories_route() {
    let (addr, engine) = start_test_server().await;
    let client = connect(addr).await;

    client
        .batch_execute(include_str!("../demos/seed.sql"))
        .await
        .unwrap();

    let rooms = rows(&client, "SELECT * FROM rooms WHERE page_size = 100").await;
    assert_eq!(rooms.len(), 8);
    let guests = rows(&client, "SELECT * FROM guests WHERE page_size = 100").await;
    assert_eq!(guests.len(), 5);

    // Room 202 hosts the checked-in stay.
    let room_202: Ulid = "01J500000000000000000R0005".parse().unwrap();
    assert_eq!(
        engine.get_room(room_202).await.unwrap().status,
        innkeep::model::RoomStatus::Occupied
    );
    let history = rows(&client, &format!("SELECT * FROM room_bookings WHERE room_id = '{room_202}'")).await;
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].get("status"), Some("checked-in"));
    assert_eq!(history[0].get("nights"), Some("7"));
    let total: f64 = history[0].get("total_price").unwrap().parse().unwrap();
    assert_eq!(total, 1050.0);

    let guest = "01J500000000000000000G0002";
    let stays = rows(&client, &format!("SELECT * FROM guest_bookings WHERE guest_id = '{guest}'")).await;
    assert_eq!(stays.len(), 1);
    assert_eq!(stays[0].get("room_number"), Some("103"));
    assert_eq!(stays[0].get("status"), Some("confirmed"));

    // A guest without bookings has an empty history; an unknown one is missing.
    let quiet = rows(&client, "SELECT * FROM guest_bookings WHERE guest_id = '01J500000000000000000G0005'").await;
    assert!(quiet.is_empty());
    assert_eq!(
        sqlstate(&client, &format!("SELECT * FROM room_bookings WHERE room_id = '{}'", Ulid::new())).await,
        "P0002"
    );

    // Maintenance room stays out of availability searches.
    let free = rows(
        &client,
        "SELECT * FROM available_rooms WHERE check_in >= CURRENT_DATE + 1 AND check_out <= CURRENT_DATE + 2 AND room_type = 'deluxe'",
    )
    .await;
    let numbers: Vec<_> = free.iter().filter_map(|r| r.get("number")).collect();
    assert_eq!(numbers, vec!["203"]);
}
