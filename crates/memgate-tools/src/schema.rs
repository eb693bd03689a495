use serde_json::{json, Value};

/// Static `tools/list` schema (§4.9). The tool set is a pure value — no
/// dynamic dispatch lives here, only in [`crate::dispatch`].
pub fn tool_list() -> Value {
    json!([
        {
            "name": "search_memory",
            "description": "搜索历史记忆，可以搜索过去的对话、事件、人格设定等",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "query": {"type": "string", "description": "搜索关键词", "default": ""},
                    "limit": {"type": "integer", "description": "返回数量", "default": 5},
                    "channel": {"type": "string", "description": "会话频道", "default": "default"}
                },
                "required": []
            }
        },
        {
            "name": "init_context",
            "description": "获取最近的对话记录和前文摘要",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "limit": {"type": "integer", "description": "获取最近几轮对话，默认4", "default": 4},
                    "channel": {"type": "string", "description": "会话频道", "default": "default"}
                },
                "required": []
            }
        },
        {
            "name": "save_diary",
            "description": "保存一篇日记，每个自然日最多保存两篇",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "content": {"type": "string", "description": "日记正文"},
                    "mood": {"type": "string", "description": "当天心情，可选"}
                },
                "required": ["content"]
            }
        },
        {
            "name": "send_sticker",
            "description": "根据心情挑一张表情包发送",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "mood": {"type": "string", "description": "心情关键词"}
                },
                "required": ["mood"]
            }
        },
        {
            "name": "geocode",
            "description": "将地址解析为经纬度坐标",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "address": {"type": "string"},
                    "city": {"type": "string"}
                },
                "required": ["address"]
            }
        },
        {
            "name": "around",
            "description": "搜索某个坐标周边的兴趣点",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "location": {"type": "string", "description": "\"lng,lat\""},
                    "keyword": {"type": "string"},
                    "radius": {"type": "integer", "default": 1000}
                },
                "required": ["location", "keyword"]
            }
        },
        {
            "name": "search",
            "description": "按关键词搜索兴趣点",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "keyword": {"type": "string"},
                    "city": {"type": "string"}
                },
                "required": ["keyword"]
            }
        },
        {
            "name": "distance",
            "description": "测量两个坐标之间的距离",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "origin": {"type": "string", "description": "\"lng,lat\""},
                    "destination": {"type": "string", "description": "\"lng,lat\""}
                },
                "required": ["origin", "destination"]
            }
        },
        {
            "name": "route",
            "description": "规划两个坐标之间的驾车路线",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "origin": {"type": "string", "description": "\"lng,lat\""},
                    "destination": {"type": "string", "description": "\"lng,lat\""}
                },
                "required": ["origin", "destination"]
            }
        },
        {
            "name": "update",
            "description": "更新一条辅助记录（仅支持 promise、wishlist）",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "kind": {"type": "string", "description": "记录类型：promise 或 wishlist"},
                    "id": {"type": "integer"},
                    "fields": {"type": "object", "description": "要更新的字段"}
                },
                "required": ["kind", "id", "fields"]
            }
        }
    ])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tool_list_is_a_nonempty_array() {
        let list = tool_list();
        assert!(list.as_array().unwrap().len() >= 9);
    }

    #[test]
    fn every_tool_carries_a_name_and_schema() {
        for tool in tool_list().as_array().unwrap() {
            assert!(tool.get("name").is_some());
            assert!(tool.get("inputSchema").is_some());
        }
    }
}
