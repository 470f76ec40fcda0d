//! Loopback tests driving real sockets through the event loop.

use std::cell::RefCell;
use std::rc::Rc;

use bytes::BytesMut;

use statio_executor::{EventLoop, TimeSpan};
use statio_net::{Endpoint, Socket, TcpClient, TcpServer};

#[test]
fn send_order_is_preserved_across_calls() {
    let mut event_loop = EventLoop::new();
    let scheduler = event_loop.scheduler();

    let server = TcpServer::new(&scheduler).unwrap();
    server.bind(0).unwrap();
    server.listen(16).unwrap();
    let port = server.local_endpoint().unwrap().port();

    let received = Rc::new(RefCell::new(BytesMut::new()));
    {
        let received = Rc::clone(&received);
        let stopper = scheduler.clone();
        server.client_accepted().subscribe(move |accepted| {
            let received = Rc::clone(&received);
            let stopper = stopper.clone();
            accepted.client.data_received().subscribe(move |data| {
                received.borrow_mut().extend_from_slice(data);
                if received.borrow().len() >= 4 {
                    stopper.stop();
                }
            });
        });
    }

    let client = TcpClient::new(&scheduler).unwrap();
    {
        let sender = client.clone();
        client.connected().subscribe(move |_| {
            sender.send(b"AB").unwrap();
            sender.send(b"CD").unwrap();
        });
    }
    client.connect(&Endpoint::new("127.0.0.1", port)).unwrap();

    // Safety net so a wedged run cannot hang the suite.
    let stopper = scheduler.clone();
    scheduler.schedule(TimeSpan::from_seconds(5.0), move || stopper.stop());

    event_loop.run();
    assert_eq!(&received.borrow()[..], b"ABCD");
}

#[test]
fn accepted_clients_deliver_server_pushes() {
    let mut event_loop = EventLoop::new();
    let scheduler = event_loop.scheduler();

    let server = TcpServer::new(&scheduler).unwrap();
    server.bind(0).unwrap();
    server.listen(16).unwrap();
    let port = server.local_endpoint().unwrap().port();

    server.client_accepted().subscribe(move |accepted| {
        let pusher = accepted.client.clone();
        accepted.client.connected().subscribe(move |_| {
            pusher.send(b"hello").unwrap();
        });
    });

    let received = Rc::new(RefCell::new(BytesMut::new()));
    let client = TcpClient::new(&scheduler).unwrap();
    {
        let received = Rc::clone(&received);
        let stopper = scheduler.clone();
        client.data_received().subscribe(move |data| {
            received.borrow_mut().extend_from_slice(data);
            stopper.stop();
        });
    }
    client.connect(&Endpoint::new("127.0.0.1", port)).unwrap();

    let stopper = scheduler.clone();
    scheduler.schedule(TimeSpan::from_seconds(5.0), move || stopper.stop());

    event_loop.run();
    assert_eq!(&received.borrow()[..], b"hello");
}

#[test]
fn refused_connects_report_disconnected() {
    let mut event_loop = EventLoop::new();
    let scheduler = event_loop.scheduler();

    // Bind then immediately free an ephemeral port so nothing listens on it.
    let closed_port = {
        let probe = Socket::stream().unwrap();
        probe.bind(0).unwrap();
        probe.local_endpoint().unwrap().port()
    };

    let client = TcpClient::new(&scheduler).unwrap();
    let dropped = Rc::new(RefCell::new(false));
    {
        let dropped = Rc::clone(&dropped);
        let stopper = scheduler.clone();
        client.disconnected().subscribe(move |_| {
            *dropped.borrow_mut() = true;
            stopper.stop();
        });
    }

    match client.connect(&Endpoint::new("127.0.0.1", closed_port)) {
        Ok(()) => {
            let stopper = scheduler.clone();
            scheduler.schedule(TimeSpan::from_seconds(5.0), move || stopper.stop());
            event_loop.run();
            assert!(*dropped.borrow());
        }
        // Loopback connects may be refused synchronously.
        Err(_) => {}
    }
}
