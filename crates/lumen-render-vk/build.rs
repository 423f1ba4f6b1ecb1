use std::{env, fs, path::PathBuf};

// Must match `GlobalUbo` in lumen-math (std140).
const GLOBAL_UBO: &str = r#"
layout(set = 0, binding = 0) uniform GlobalUbo {
    mat4 projection;
    mat4 view;
    vec4 ambientLightColor;
    vec4 lightPosition;
    vec4 lightColor;
} ubo;
"#;

// Must match `mesh::Vertex`:
//   binding 0, location 0: position (vec3)
//   binding 0, location 1: normal   (vec3)
//   binding 0, location 2: tangent  (vec3)
//   binding 0, location 3: uv       (vec2)
// and `PushConstants` in lumen-math.
const MESH_VERT: &str = r#"
layout(location = 0) in vec3 inPos;
layout(location = 1) in vec3 inNormal;
layout(location = 2) in vec3 inTangent;
layout(location = 3) in vec2 inUv;

layout(push_constant) uniform Push {
    mat4 model;
    mat4 normal;
} push;

layout(location = 0) out vec3 vNormal;
layout(location = 1) out vec2 vUv;
layout(location = 2) out vec3 vWorldPos;

void main() {
    vec4 world = push.model * vec4(inPos, 1.0);
    gl_Position = ubo.projection * ubo.view * world;
    vNormal = normalize(mat3(push.normal) * inNormal);
    vUv = inUv;
    vWorldPos = world.xyz;
}
"#;

// Point light diffuse with inverse-square falloff, plus ambient.
const MESH_FRAG: &str = r#"
layout(location = 0) in vec3 vNormal;
layout(location = 1) in vec2 vUv;
layout(location = 2) in vec3 vWorldPos;

layout(set = 1, binding = 0) uniform sampler2D albedo;

layout(location = 0) out vec4 outColor;

void main() {
    vec3 toLight = ubo.lightPosition.xyz - vWorldPos;
    float attenuation = 1.0 / dot(toLight, toLight);
    vec3 light = ubo.lightColor.rgb * ubo.lightColor.w * attenuation;
    vec3 ambient = ubo.ambientLightColor.rgb * ubo.ambientLightColor.w;
    float diffuse = abs(dot(normalize(vNormal), normalize(toLight)));
    vec4 base = texture(albedo, vUv);
    outColor = vec4(base.rgb * (ambient + light * diffuse), base.a);
}
"#;

// Six corners of a camera-facing quad, no vertex buffer.
const POINT_LIGHT_VERT: &str = r#"
const vec2 OFFSETS[6] = vec2[](
    vec2(-1.0, -1.0),
    vec2(-1.0, 1.0),
    vec2(1.0, -1.0),
    vec2(1.0, -1.0),
    vec2(-1.0, 1.0),
    vec2(1.0, 1.0)
);

layout(location = 0) out vec2 vOffset;

void main() {
    vOffset = OFFSETS[gl_VertexIndex];
    vec3 right = vec3(ubo.view[0][0], ubo.view[1][0], ubo.view[2][0]);
    vec3 up = vec3(ubo.view[0][1], ubo.view[1][1], ubo.view[2][1]);
    vec3 world = ubo.lightPosition.xyz
        + ubo.lightPosition.w * (vOffset.x * right + vOffset.y * up);
    gl_Position = ubo.projection * ubo.view * vec4(world, 1.0);
}
"#;

const POINT_LIGHT_FRAG: &str = r#"
layout(location = 0) in vec2 vOffset;

layout(location = 0) out vec4 outColor;

void main() {
    float d2 = dot(vOffset, vOffset);
    if (d2 >= 1.0) {
        discard;
    }
    outColor = vec4(ubo.lightColor.rgb, 1.0 - d2);
}
"#;

fn main() {
    let out = PathBuf::from(env::var("OUT_DIR").unwrap());

    let comp = shaderc::Compiler::new().unwrap();
    let mut opts = shaderc::CompileOptions::new().unwrap();
    opts.set_target_env(
        shaderc::TargetEnv::Vulkan,
        shaderc::EnvVersion::Vulkan1_0 as u32,
    );
    opts.set_optimization_level(shaderc::OptimizationLevel::Performance);

    let shaders = [
        ("mesh.vert", shaderc::ShaderKind::Vertex, MESH_VERT),
        ("mesh.frag", shaderc::ShaderKind::Fragment, MESH_FRAG),
        ("point_light.vert", shaderc::ShaderKind::Vertex, POINT_LIGHT_VERT),
        ("point_light.frag", shaderc::ShaderKind::Fragment, POINT_LIGHT_FRAG),
    ];
    for (name, kind, body) in shaders {
        let src = format!("#version 450\n{GLOBAL_UBO}{body}");
        let spv = comp
            .compile_into_spirv(&src, kind, name, "main", Some(&opts))
            .unwrap();
        fs::write(out.join(format!("{name}.spv")), spv.as_binary_u8()).unwrap();
    }

    println!("cargo:rerun-if-changed=build.rs");
}
