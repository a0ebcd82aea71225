mod server;

use clap::{Arg, Command};
use log::{error, info};
use oak_common::config::Settings;
use oak_common::logger;
use oak_common::ToolHandler;
use server::Server;
use std::process;

#[tokio::main]
async fn main() {
    // 解析命令行参数
    let matches = Command::new("Professor Oak Server")
        .version("0.1.0")
        .about("Line-delimited JSON tool server for the learning tracker")
        .arg(
            Arg::new("config-dir")
                .short('c')
                .long("config-dir")
                .value_name("DIR")
                .help("配置目录，默认为 ./config")
                .num_args(1),
        )
        .arg(
            Arg::new("data-path")
                .short('d')
                .long("data-path")
                .value_name("PATH")
                .help("数据根目录，覆盖配置文件和环境变量")
                .num_args(1),
        )
        .get_matches();

    // 加载配置
    let config_dir = matches
        .get_one::<String>("config-dir")
        .map(String::as_str)
        .unwrap_or("config");
    let mut settings = match Settings::load_from(config_dir) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("加载配置失败: {}", e);
            process::exit(1);
        }
    };

    // 命令行指定的目录优先
    if let Some(data_path) = matches.get_one::<String>("data-path") {
        settings.data.data_path = data_path.clone();
        settings.data.data_path_env.clear();
    }

    // 初始化日志
    if let Err(e) = logger::init_logger(&settings.logging.log_file, &settings.logging.level) {
        eprintln!("初始化日志失败: {}", e);
        process::exit(1);
    }

    info!(
        "服务配置: 名称={}, 数据目录={}, 会话有效期={}秒",
        settings.server.name,
        settings.data_root().resolve().display(),
        settings.sessions.expiry_seconds
    );

    let handler = ToolHandler::from_settings(&settings);
    let server = Server::new(handler, settings.sessions.cleanup_interval_seconds);

    match server.run(tokio::io::stdin(), tokio::io::stdout()).await {
        Ok(()) => info!("服务正常关闭"),
        Err(e) => {
            error!("服务异常退出: {}", e);
            process::exit(1);
        }
    }
}
