//! Shared scheme fixture: the service scheme at layer 1 and a tiny API
//! scheme at layer 100.

use pylon_tl::Registry;

pub const API_LAYER: u32 = 100;

const SERVICE_SCHEME: &str = r#"{
    "constructors": [
        {"id": "481674261", "predicate": "vector", "type": "Vector t", "params": []},
        {"id": "85337187", "predicate": "resPQ", "type": "ResPQ", "params": [
            {"name": "nonce", "type": "int128"},
            {"name": "server_nonce", "type": "int128"},
            {"name": "pq", "type": "bytes"},
            {"name": "server_public_key_fingerprints", "type": "Vector<long>"}
        ]},
        {"id": "-2083955988", "predicate": "p_q_inner_data", "type": "P_Q_inner_data", "params": [
            {"name": "pq", "type": "bytes"},
            {"name": "p", "type": "bytes"},
            {"name": "q", "type": "bytes"},
            {"name": "nonce", "type": "int128"},
            {"name": "server_nonce", "type": "int128"},
            {"name": "new_nonce", "type": "int256"}
        ]},
        {"id": "1013613780", "predicate": "p_q_inner_data_temp", "type": "P_Q_inner_data", "params": [
            {"name": "pq", "type": "bytes"},
            {"name": "p", "type": "bytes"},
            {"name": "q", "type": "bytes"},
            {"name": "nonce", "type": "int128"},
            {"name": "server_nonce", "type": "int128"},
            {"name": "new_nonce", "type": "int256"},
            {"name": "expires_in", "type": "int"}
        ]},
        {"id": "2043348061", "predicate": "server_DH_params_fail", "type": "Server_DH_Params", "params": [
            {"name": "nonce", "type": "int128"},
            {"name": "server_nonce", "type": "int128"},
            {"name": "new_nonce_hash", "type": "int128"}
        ]},
        {"id": "-790100132", "predicate": "server_DH_params_ok", "type": "Server_DH_Params", "params": [
            {"name": "nonce", "type": "int128"},
            {"name": "server_nonce", "type": "int128"},
            {"name": "encrypted_answer", "type": "bytes"}
        ]},
        {"id": "-1249309254", "predicate": "server_DH_inner_data", "type": "Server_DH_inner_data", "params": [
            {"name": "nonce", "type": "int128"},
            {"name": "server_nonce", "type": "int128"},
            {"name": "g", "type": "int"},
            {"name": "dh_prime", "type": "bytes"},
            {"name": "g_a", "type": "bytes"},
            {"name": "server_time", "type": "int"}
        ]},
        {"id": "1715713620", "predicate": "client_DH_inner_data", "type": "Client_DH_Inner_Data", "params": [
            {"name": "nonce", "type": "int128"},
            {"name": "server_nonce", "type": "int128"},
            {"name": "retry_id", "type": "long"},
            {"name": "g_b", "type": "bytes"}
        ]},
        {"id": "1003222836", "predicate": "dh_gen_ok", "type": "Set_client_DH_params_answer", "params": [
            {"name": "nonce", "type": "int128"},
            {"name": "server_nonce", "type": "int128"},
            {"name": "new_nonce_hash1", "type": "int128"}
        ]},
        {"id": "1188831161", "predicate": "dh_gen_retry", "type": "Set_client_DH_params_answer", "params": [
            {"name": "nonce", "type": "int128"},
            {"name": "server_nonce", "type": "int128"},
            {"name": "new_nonce_hash2", "type": "int128"}
        ]},
        {"id": "-1499615742", "predicate": "dh_gen_fail", "type": "Set_client_DH_params_answer", "params": [
            {"name": "nonce", "type": "int128"},
            {"name": "server_nonce", "type": "int128"},
            {"name": "new_nonce_hash3", "type": "int128"}
        ]},
        {"id": "1973679973", "predicate": "bind_auth_key_inner", "type": "BindAuthKeyInner", "params": [
            {"name": "nonce", "type": "long"},
            {"name": "temp_auth_key_id", "type": "long"},
            {"name": "perm_auth_key_id", "type": "long"},
            {"name": "temp_session_id", "type": "long"},
            {"name": "expires_at", "type": "int"}
        ]},
        {"id": "-212046591", "predicate": "rpc_result", "type": "RpcResult", "params": [
            {"name": "req_msg_id", "type": "long"},
            {"name": "result", "type": "Object"}
        ]},
        {"id": "558156313", "predicate": "rpc_error", "type": "RpcError", "params": [
            {"name": "error_code", "type": "int"},
            {"name": "error_message", "type": "string"}
        ]},
        {"id": "880243653", "predicate": "pong", "type": "Pong", "params": [
            {"name": "msg_id", "type": "long"},
            {"name": "ping_id", "type": "long"}
        ]},
        {"id": "-307542917", "predicate": "bad_server_salt", "type": "BadMsgNotification", "params": [
            {"name": "bad_msg_id", "type": "long"},
            {"name": "bad_msg_seqno", "type": "int"},
            {"name": "error_code", "type": "int"},
            {"name": "new_server_salt", "type": "long"}
        ]},
        {"id": "-1477445615", "predicate": "bad_msg_notification", "type": "BadMsgNotification", "params": [
            {"name": "bad_msg_id", "type": "long"},
            {"name": "bad_msg_seqno", "type": "int"},
            {"name": "error_code", "type": "int"}
        ]},
        {"id": "-1631450872", "predicate": "new_session_created", "type": "NewSession", "params": [
            {"name": "first_msg_id", "type": "long"},
            {"name": "unique_id", "type": "long"},
            {"name": "server_salt", "type": "long"}
        ]},
        {"id": "1658238041", "predicate": "msgs_ack", "type": "MsgsAck", "params": [
            {"name": "msg_ids", "type": "Vector<long>"}
        ]},
        {"id": "155834844", "predicate": "future_salt", "type": "FutureSalt", "params": [
            {"name": "valid_since", "type": "int"},
            {"name": "valid_until", "type": "int"},
            {"name": "salt", "type": "long"}
        ]},
        {"id": "2924480661", "predicate": "future_salts", "type": "FutureSalts", "params": [
            {"name": "req_msg_id", "type": "long"},
            {"name": "now", "type": "int"},
            {"name": "salts", "type": "vector<future_salt>"}
        ]},
        {"id": "81704317", "predicate": "msgs_state_info", "type": "MsgsStateInfo", "params": [
            {"name": "req_msg_id", "type": "long"},
            {"name": "info", "type": "bytes"}
        ]}
    ],
    "methods": [
        {"id": "-1099002127", "method": "req_pq_multi", "type": "ResPQ", "params": [
            {"name": "nonce", "type": "int128"}
        ]},
        {"id": "-686627650", "method": "req_DH_params", "type": "Server_DH_Params", "params": [
            {"name": "nonce", "type": "int128"},
            {"name": "server_nonce", "type": "int128"},
            {"name": "p", "type": "bytes"},
            {"name": "q", "type": "bytes"},
            {"name": "public_key_fingerprint", "type": "long"},
            {"name": "encrypted_data", "type": "bytes"}
        ]},
        {"id": "-184262881", "method": "set_client_DH_params", "type": "Set_client_DH_params_answer", "params": [
            {"name": "nonce", "type": "int128"},
            {"name": "server_nonce", "type": "int128"},
            {"name": "encrypted_data", "type": "bytes"}
        ]},
        {"id": "-841733627", "method": "auth.bindTempAuthKey", "type": "Bool", "params": [
            {"name": "perm_auth_key_id", "type": "long"},
            {"name": "nonce", "type": "long"},
            {"name": "expires_at", "type": "int"},
            {"name": "encrypted_message", "type": "bytes"}
        ]},
        {"id": "2059302892", "method": "ping", "type": "Pong", "params": [
            {"name": "ping_id", "type": "long"}
        ]}
    ]
}"#;

const API_SCHEME: &str = r##"{
    "constructors": [
        {"id": "305419896", "predicate": "echoReply", "type": "EchoReply", "params": [
            {"name": "text", "type": "string"}
        ]},
        {"id": "-484987010", "predicate": "updatesTooLong", "type": "Updates", "params": []}
    ],
    "methods": [
        {"id": "1122867", "method": "echo.say", "type": "EchoReply", "params": [
            {"name": "text", "type": "string"}
        ]},
        {"id": "-627372787", "method": "invokeWithLayer", "type": "X", "params": [
            {"name": "layer", "type": "int"},
            {"name": "query", "type": "!X"}
        ]},
        {"id": "-1043505495", "method": "initConnection", "type": "X", "params": [
            {"name": "flags", "type": "#"},
            {"name": "api_id", "type": "int"},
            {"name": "device_model", "type": "string"},
            {"name": "system_version", "type": "string"},
            {"name": "app_version", "type": "string"},
            {"name": "system_lang_code", "type": "string"},
            {"name": "lang_pack", "type": "string"},
            {"name": "lang_code", "type": "string"},
            {"name": "proxy", "type": "flags.0?InputClientProxy"},
            {"name": "params", "type": "flags.1?JSONValue"},
            {"name": "query", "type": "!X"}
        ]}
    ]
}"##;

pub fn registry() -> Registry {
    let mut registry = Registry::new();
    registry.load_json(1, SERVICE_SCHEME).unwrap();
    registry.load_json(API_LAYER, API_SCHEME).unwrap();
    registry
}
