use tokio::net::UdpSocket;
use std::time::Duration;

#[tokio::main]
async fn main() {
    let peer = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let peer_addr = peer.local_addr().unwrap();
    let sock = UdpSocket::bind(("0.0.0.0", 0)).await.unwrap();
    let local = std::net::SocketAddr::from(([127,0,0,1], sock.local_addr().unwrap().port()));
    println!("peer={peer_addr} sock_local={local}");

    match sock.try_send_to(b"hello", peer_addr) {
        Ok(n) => println!("sent {n}"),
        Err(e) => println!("err {e:?}"),
    }

    let mut buf = [0u8; 10];
    let res = tokio::time::timeout(Duration::from_secs(3), peer.recv_from(&mut buf)).await;
    println!("{:?}", res);
}
