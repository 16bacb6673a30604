#![cfg(feature = "mysql")]

use std::io;

use mysql_async::{DriverError, ServerError};

use obsmith::dut::Category;
use obsmith::mysql::classify;

fn server(code: u16, message: &str) -> mysql_async::Error {
    mysql_async::Error::Server(ServerError {
        code,
        message: message.to_string(),
        state: "HY000".to_string(),
    })
}

#[test]
fn server_errors_keep_their_code() {
    let syntax = classify(server(1064, "You have an error in your SQL syntax"));
    assert_eq!((syntax.code, syntax.category), (1064, Category::ExpectedInvalid));
    let internal = classify(server(4016, "Internal error"));
    assert_eq!((internal.code, internal.category), (4016, Category::Unclassified));
    assert_eq!(internal.message, "Internal error");
}

#[test]
fn only_connection_loss_gets_the_client_codes() {
    let closed = classify(mysql_async::Error::Driver(DriverError::ConnectionClosed));
    assert_eq!(closed.code, 2006);
    let reset = classify(mysql_async::Error::from(io::Error::new(
        io::ErrorKind::ConnectionReset,
        "reset by peer",
    )));
    assert_eq!(reset.code, 2013);

    let nested = classify(mysql_async::Error::Driver(DriverError::NestedTransaction));
    assert_eq!(nested.code, -1);
    assert_eq!(nested.category, Category::Unclassified);
    assert!(!nested.message.contains("gone away"), "{}", nested.message);
}
