pub mod server;

#[derive(Debug)]
pub enum Action {
    Server {
        port: u16,
        dsn: String,
        public_base_url: String,
        otp_debug_echo: bool,
    },
}
